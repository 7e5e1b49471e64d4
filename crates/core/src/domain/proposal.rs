use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub String);

/// Externally visible correlation id, shared by a proposal and its resubmissions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicId(pub String);

/// Users are addressed by email.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct UserId(pub String);

impl From<String> for UserId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl UserId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct ClientTag(String);

impl From<String> for ClientTag {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl ClientTag {
    pub const NCR: &'static str = "ncr";

    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn ncr() -> Self {
        Self(Self::NCR.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    Linear,
    Parallel,
}

impl WorkflowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Parallel => "parallel",
        }
    }
}

impl FromStr for WorkflowMode {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "parallel" => Ok(Self::Parallel),
            _ => Err(DomainError::UnknownWorkflowMode { mode: value.to_owned() }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub public_id: PublicId,
    pub name: String,
    pub workflow: WorkflowMode,
    pub client: Option<ClientTag>,
    pub requester: UserId,
    pub predecessor_id: Option<ProposalId>,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new_id() -> ProposalId {
        ProposalId(format!("P-{}", Uuid::new_v4().simple()))
    }
}

/// `FY<yy>-<8 hex>`; the federal fiscal year rolls over on October 1.
pub fn generate_public_id(now: DateTime<Utc>) -> PublicId {
    let fiscal_year = if now.month() >= 10 { now.year() + 1 } else { now.year() };
    let suffix = Uuid::new_v4().simple().to_string();
    PublicId(format!("FY{:02}-{}", fiscal_year.rem_euclid(100), &suffix[..8]))
}
