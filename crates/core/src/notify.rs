//! Notification port and per-event fan-out.
//!
//! The dispatch core only knows "send template X to recipient Y". Rendering and
//! delivery guarantees belong to the [`NotificationPort`] implementation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::approval::ApprovalStepId;
use crate::domain::proposal::{ProposalId, ProposalStatus, PublicId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    ProposalCreatedConfirmation,
    ApprovalRequested,
    ApprovalReplyReceived,
    ProposalRejected,
    ObserverUpdate,
    CommentAdded,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProposalCreatedConfirmation => "proposal_created_confirmation",
            Self::ApprovalRequested => "approval_requested",
            Self::ApprovalReplyReceived => "approval_reply_received",
            Self::ProposalRejected => "proposal_rejected",
            Self::ObserverUpdate => "observer_update",
            Self::CommentAdded => "comment_added",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub proposal_id: ProposalId,
    pub public_id: PublicId,
    pub proposal_name: String,
    pub proposal_status: ProposalStatus,
    pub step_id: Option<ApprovalStepId>,
    pub responder: Option<UserId>,
    pub access_token: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub delivery_id: String,
    pub accepted_at: DateTime<Utc>,
}

impl DeliveryReceipt {
    pub fn accepted_now() -> Self {
        Self { delivery_id: Uuid::new_v4().to_string(), accepted_at: Utc::now() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryError {
    #[error("recipient `{recipient}` was refused: {reason}")]
    Refused { recipient: String, reason: String },
    #[error("notification transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send(
        &self,
        recipient: &UserId,
        template: TemplateKind,
        payload: &NotificationPayload,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// One recipient's notice as decided by a dispatch policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub recipient: UserId,
    pub template: TemplateKind,
    pub step_id: Option<ApprovalStepId>,
    /// Issue a fresh access token for `step_id` before sending.
    pub issue_token: bool,
    pub message: Option<String>,
}

impl Notice {
    pub fn to(recipient: &UserId, template: TemplateKind) -> Self {
        Self {
            recipient: recipient.clone(),
            template,
            step_id: None,
            issue_token: false,
            message: None,
        }
    }

    pub fn approval_requested(recipient: &UserId, step_id: &ApprovalStepId) -> Self {
        Self {
            recipient: recipient.clone(),
            template: TemplateKind::ApprovalRequested,
            step_id: Some(step_id.clone()),
            issue_token: true,
            message: None,
        }
    }

    pub fn for_step(mut self, step_id: &ApprovalStepId) -> Self {
        self.step_id = Some(step_id.clone());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Recipients resolved once per lifecycle event, deduplicated in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationPlan {
    notices: Vec<Notice>,
}

impl NotificationPlan {
    pub fn push(&mut self, notice: Notice) {
        let duplicate = self.notices.iter().any(|existing| {
            existing.recipient == notice.recipient
                && existing.template == notice.template
                && existing.step_id == notice.step_id
        });
        if !duplicate {
            self.notices.push(notice);
        }
    }

    pub fn extend(&mut self, notices: impl IntoIterator<Item = Notice>) {
        for notice in notices {
            self.push(notice);
        }
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn recipients_of(&self, template: TemplateKind) -> Vec<&UserId> {
        self.notices
            .iter()
            .filter(|notice| notice.template == template)
            .map(|notice| &notice.recipient)
            .collect()
    }

    pub fn into_notices(self) -> Vec<Notice> {
        self.notices
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub recipient: UserId,
    pub template: TemplateKind,
    pub step_id: Option<ApprovalStepId>,
    pub outcome: Result<DeliveryReceipt, DeliveryError>,
}

impl DeliveryRecord {
    pub fn delivered(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentNotification {
    pub recipient: UserId,
    pub template: TemplateKind,
    pub payload: NotificationPayload,
}

/// Records every send; recipients listed as failing get a [`DeliveryError`].
#[derive(Clone, Default)]
pub struct RecordingNotificationPort {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    failing: Arc<Mutex<HashSet<UserId>>>,
}

impl RecordingNotificationPort {
    pub fn failing_for(recipients: impl IntoIterator<Item = UserId>) -> Self {
        let port = Self::default();
        match port.failing.lock() {
            Ok(mut failing) => failing.extend(recipients),
            Err(poisoned) => poisoned.into_inner().extend(recipients),
        }
        port
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_to(&self, recipient: &str, template: TemplateKind) -> Vec<SentNotification> {
        let recipient = UserId::new(recipient);
        self.sent()
            .into_iter()
            .filter(|sent| sent.recipient == recipient && sent.template == template)
            .collect()
    }

    pub fn recipients_of(&self, template: TemplateKind) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|sent| sent.template == template)
            .map(|sent| sent.recipient.0)
            .collect()
    }

    pub fn clear(&self) {
        match self.sent.lock() {
            Ok(mut sent) => sent.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn is_failing(&self, recipient: &UserId) -> bool {
        match self.failing.lock() {
            Ok(failing) => failing.contains(recipient),
            Err(poisoned) => poisoned.into_inner().contains(recipient),
        }
    }
}

#[async_trait]
impl NotificationPort for RecordingNotificationPort {
    async fn send(
        &self,
        recipient: &UserId,
        template: TemplateKind,
        payload: &NotificationPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if self.is_failing(recipient) {
            return Err(DeliveryError::Refused {
                recipient: recipient.0.clone(),
                reason: "mailbox unavailable".to_owned(),
            });
        }

        let record =
            SentNotification { recipient: recipient.clone(), template, payload: payload.clone() };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(DeliveryReceipt::accepted_now())
    }
}
