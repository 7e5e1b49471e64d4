use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::proposal::{ProposalId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalStepId(pub String);

impl ApprovalStepId {
    pub fn generate() -> Self {
        Self(format!("APS-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: ApprovalStepId,
    pub proposal_id: ProposalId,
    pub position: u32,
    pub approver: UserId,
    pub status: StepStatus,
    pub access_token_digest: Option<String>,
    pub token_issued_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Bumped on every persisted change; the CAS update matches on it.
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

impl ApprovalStep {
    pub fn pending(
        proposal_id: ProposalId,
        position: u32,
        approver: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalStepId::generate(),
            proposal_id,
            position,
            approver,
            status: StepStatus::Pending,
            access_token_digest: None,
            token_issued_at: None,
            responded_at: None,
            version: 1,
            created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub proposal_id: ProposalId,
    pub step_id: ApprovalStepId,
    pub approver: UserId,
    pub comment: String,
    pub rejected_at: DateTime<Utc>,
}
