//! Lifecycle-event facade over the policies.
//!
//! Each entry point loads a fresh [`ProposalContext`], applies at most one step
//! transition through the store's compare-and-set, asks the selected policy for
//! a [`NotificationPlan`], and fans it out. A failed delivery never aborts the
//! fan-out and never rolls back a committed transition.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{DispatchKind, DispatchPolicy, PolicySelector, ProposalContext};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::chain::{ApprovalChain, StepResolution};
use crate::domain::approval::{ApprovalStepId, StepStatus};
use crate::domain::comment::CommentId;
use crate::domain::proposal::{ProposalId, ProposalStatus, UserId};
use crate::errors::{ApplicationError, DomainError};
use crate::notify::{
    DeliveryRecord, NotificationPayload, NotificationPlan, NotificationPort, TemplateKind,
};
use crate::store::{ProposalStore, StoreError};
use crate::token::{token_matches, IssuedToken};

const ACTOR: &str = "dispatcher";

/// What one lifecycle event did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub correlation_id: String,
    pub proposal_id: ProposalId,
    pub kind: DispatchKind,
    pub status: ProposalStatus,
    /// The aggregate status left `pending` during this event.
    pub status_changed: bool,
    pub deliveries: Vec<DeliveryRecord>,
}

impl DispatchReport {
    pub fn recipients_of(&self, template: TemplateKind) -> Vec<&UserId> {
        self.deliveries
            .iter()
            .filter(|record| record.template == template)
            .map(|record| &record.recipient)
            .collect()
    }

    pub fn failed_deliveries(&self) -> impl Iterator<Item = &DeliveryRecord> {
        self.deliveries.iter().filter(|record| !record.delivered())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAction {
    Approve,
    Reject,
}

impl FromStr for LinkAction {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported approver action `{other}` (expected approve|reject)"
            ))),
        }
    }
}

/// A click on an approve/reject link from an approval request.
#[derive(Clone, Debug)]
pub struct LinkResponse {
    pub proposal_id: ProposalId,
    pub user: UserId,
    pub token: SecretString,
    pub action: LinkAction,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Completed(DispatchReport),
    /// Unknown proposal, user without a step, or a token that does not match.
    Unauthorized,
    /// The responder's step, or the whole proposal, is already decided.
    AlreadyResolved,
}

pub struct Dispatcher {
    selector: Arc<PolicySelector>,
    store: Arc<dyn ProposalStore>,
    notifier: Arc<dyn NotificationPort>,
    audit: Arc<dyn AuditSink>,
}

impl Dispatcher {
    pub fn new(
        selector: Arc<PolicySelector>,
        store: Arc<dyn ProposalStore>,
        notifier: Arc<dyn NotificationPort>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { selector, store, notifier, audit }
    }

    pub fn store(&self) -> &Arc<dyn ProposalStore> {
        &self.store
    }

    pub async fn on_proposal_created(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<DispatchReport, ApplicationError> {
        let correlation_id = new_correlation_id();
        let context = self.load_context(proposal_id).await?;
        let policy = self.policy_for(&context)?;
        let plan = policy.on_proposal_created(&context);
        let completed = context.chain.status() != ProposalStatus::Pending;

        self.finish(correlation_id, "proposal.created", &context, policy, plan, completed).await
    }

    pub async fn on_approval_approved(
        &self,
        step_id: &ApprovalStepId,
    ) -> Result<DispatchReport, ApplicationError> {
        let correlation_id = new_correlation_id();
        let step = self
            .store
            .find_step(step_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("approval step", step_id.0.clone()))?;
        let mut context = self.load_context(&step.proposal_id).await?;

        let resolution = match context.chain.approve(step_id, Utc::now()) {
            Ok(resolution) => resolution,
            Err(error) => return Err(self.refuse(&correlation_id, &context, step_id, error)),
        };
        let changed = self.persist(&correlation_id, &mut context, &resolution).await?;

        let approved = context.chain.step(step_id).cloned().ok_or_else(|| {
            DomainError::InvariantViolation(format!("approved step `{}` vanished", step_id.0))
        })?;
        let policy = self.policy_for(&context)?;
        let plan = policy.on_approval_approved(&context, &approved);

        self.finish(correlation_id, "approval.approved", &context, policy, plan, changed).await
    }

    pub async fn on_proposal_rejected(
        &self,
        proposal_id: &ProposalId,
        step_id: &ApprovalStepId,
        comment: &str,
    ) -> Result<DispatchReport, ApplicationError> {
        let correlation_id = new_correlation_id();
        let mut context = self.load_context(proposal_id).await?;

        let resolution = match context.chain.reject(step_id, comment, Utc::now()) {
            Ok(resolution) => resolution,
            Err(error) => return Err(self.refuse(&correlation_id, &context, step_id, error)),
        };
        let changed = self.persist(&correlation_id, &mut context, &resolution).await?;

        let rejection = self
            .store
            .find_rejection(proposal_id)
            .await?
            .or_else(|| resolution.rejection.clone())
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "proposal `{}` was rejected without a rejection record",
                    proposal_id.0
                ))
            })?;
        let policy = self.policy_for(&context)?;
        let plan = policy.on_proposal_rejected(&context, &rejection);

        self.finish(correlation_id, "proposal.rejected", &context, policy, plan, changed).await
    }

    pub async fn on_comment_created(
        &self,
        comment_id: &CommentId,
    ) -> Result<DispatchReport, ApplicationError> {
        let correlation_id = new_correlation_id();
        let comment = self
            .store
            .find_comment(comment_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("comment", comment_id.0.clone()))?;
        let context = self.load_context(&comment.proposal_id).await?;
        let policy = self.policy_for(&context)?;
        let plan = policy.on_comment_created(&context, &comment);

        self.finish(correlation_id, "comment.created", &context, policy, plan, false).await
    }

    pub async fn on_proposal_update(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<DispatchReport, ApplicationError> {
        let correlation_id = new_correlation_id();
        let context = self.load_context(proposal_id).await?;
        let policy = self.policy_for(&context)?;
        let plan = policy.on_proposal_update(&context);

        self.finish(correlation_id, "proposal.updated", &context, policy, plan, false).await
    }

    /// Re-sends an approval request with a freshly issued token.
    pub async fn request_approver_action(
        &self,
        step_id: &ApprovalStepId,
    ) -> Result<DispatchReport, ApplicationError> {
        let correlation_id = new_correlation_id();
        let step = self
            .store
            .find_step(step_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("approval step", step_id.0.clone()))?;
        let context = self.load_context(&step.proposal_id).await?;

        let step = match context.chain.ensure_can_respond(step_id) {
            Ok(step) => step.clone(),
            Err(error) => return Err(self.refuse(&correlation_id, &context, step_id, error)),
        };
        let policy = self.policy_for(&context)?;
        let plan = policy.request_approver_action(&context, &step);

        self.finish(correlation_id, "approval.reminded", &context, policy, plan, false).await
    }

    /// Authenticates a link response by token, then runs the matching transition.
    ///
    /// Step state is checked before the token: a resolved step answers
    /// [`LinkOutcome::AlreadyResolved`] even when the token is stale.
    pub async fn respond_via_link(
        &self,
        response: LinkResponse,
    ) -> Result<LinkOutcome, ApplicationError> {
        let correlation_id = new_correlation_id();
        let Some(proposal) = self.store.find_proposal(&response.proposal_id).await? else {
            self.link_refused(&correlation_id, &response, "unknown proposal");
            return Ok(LinkOutcome::Unauthorized);
        };

        let steps = self.store.list_steps(&proposal.id).await?;
        let owned: Vec<_> = steps.iter().filter(|step| step.approver == response.user).collect();
        if owned.is_empty() {
            self.link_refused(&correlation_id, &response, "user has no step on this proposal");
            return Ok(LinkOutcome::Unauthorized);
        }
        let Some(step) = owned.into_iter().find(|step| step.status == StepStatus::Pending) else {
            return Ok(LinkOutcome::AlreadyResolved);
        };

        let token_valid = step
            .access_token_digest
            .as_deref()
            .map(|digest| token_matches(response.token.expose_secret(), digest))
            .unwrap_or(false);
        if !token_valid {
            let error = DomainError::InvalidAccessToken { step_id: step.id.clone() };
            self.link_refused(&correlation_id, &response, &error.to_string());
            return Ok(LinkOutcome::Unauthorized);
        }

        let step_id = step.id.clone();
        let result = match response.action {
            LinkAction::Approve => self.on_approval_approved(&step_id).await,
            LinkAction::Reject => {
                let comment = response.comment.as_deref().unwrap_or_default();
                self.on_proposal_rejected(&proposal.id, &step_id, comment).await
            }
        };

        match result {
            Ok(report) => Ok(LinkOutcome::Completed(report)),
            Err(ApplicationError::Domain(
                DomainError::StepAlreadyResolved { .. }
                | DomainError::ProposalAlreadyRejected { .. },
            )) => Ok(LinkOutcome::AlreadyResolved),
            Err(error) => Err(error),
        }
    }

    async fn load_context(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<ProposalContext, ApplicationError> {
        let proposal = self
            .store
            .find_proposal(proposal_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("proposal", proposal_id.0.clone()))?;
        let steps = self.store.list_steps(proposal_id).await?;
        let observations = self.store.list_observations(proposal_id).await?;

        Ok(ProposalContext {
            chain: ApprovalChain::new(proposal.id.clone(), proposal.workflow, steps),
            proposal,
            observations,
        })
    }

    fn policy_for(&self, context: &ProposalContext) -> Result<&dyn DispatchPolicy, DomainError> {
        self.selector.select(context.proposal.workflow, context.proposal.client.as_ref())
    }

    /// Applies `resolution` through the store and replaces the context's chain
    /// with the steps as committed by that write. Returns whether this write
    /// moved the aggregate status out of `pending`.
    async fn persist(
        &self,
        correlation_id: &str,
        context: &mut ProposalContext,
        resolution: &StepResolution,
    ) -> Result<bool, ApplicationError> {
        match self.store.resolve_step(resolution).await {
            Ok(committed) => {
                let event_type = match resolution.status {
                    StepStatus::Rejected => "approval.step_rejected",
                    _ => "approval.step_approved",
                };
                let category = match resolution.status {
                    StepStatus::Rejected => AuditCategory::Rejection,
                    _ => AuditCategory::Approval,
                };
                self.audit.emit(
                    AuditEvent::new(
                        Some(context.proposal.id.clone()),
                        correlation_id,
                        event_type,
                        category,
                        ACTOR,
                        AuditOutcome::Success,
                    )
                    .with_metadata("step_id", resolution.step_id.0.clone())
                    .with_metadata("expected_version", resolution.expected_version.to_string()),
                );
                context.chain = ApprovalChain::new(
                    context.proposal.id.clone(),
                    context.proposal.workflow,
                    committed,
                );
                Ok(context.chain.status() != ProposalStatus::Pending)
            }
            Err(StoreError::Conflict { .. }) => {
                let error =
                    DomainError::StepAlreadyResolved { step_id: resolution.step_id.clone() };
                Err(self.refuse(correlation_id, context, &resolution.step_id, error))
            }
            Err(StoreError::ProposalRejected { .. }) => {
                let proposal_id = context.proposal.id.clone();
                let error = DomainError::ProposalAlreadyRejected { proposal_id };
                Err(self.refuse(correlation_id, context, &resolution.step_id, error))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn refuse(
        &self,
        correlation_id: &str,
        context: &ProposalContext,
        step_id: &ApprovalStepId,
        error: DomainError,
    ) -> ApplicationError {
        warn!(
            event_name = "approval.transition_refused",
            correlation_id,
            proposal_id = %context.proposal.id.0,
            step_id = %step_id.0,
            error = %error,
            "approval transition refused"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(context.proposal.id.clone()),
                correlation_id,
                "approval.transition_refused",
                AuditCategory::Approval,
                ACTOR,
                AuditOutcome::Rejected,
            )
            .with_metadata("step_id", step_id.0.clone())
            .with_metadata("reason", error.to_string()),
        );
        ApplicationError::Domain(error)
    }

    fn link_refused(&self, correlation_id: &str, response: &LinkResponse, reason: &str) {
        warn!(
            event_name = "approval.link_refused",
            correlation_id,
            proposal_id = %response.proposal_id.0,
            user = %response.user,
            reason,
            "approval link refused"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(response.proposal_id.clone()),
                correlation_id,
                "approval.link_refused",
                AuditCategory::Approval,
                response.user.as_str(),
                AuditOutcome::Rejected,
            )
            .with_metadata("reason", reason),
        );
    }

    async fn finish(
        &self,
        correlation_id: String,
        event_name: &'static str,
        context: &ProposalContext,
        policy: &dyn DispatchPolicy,
        plan: NotificationPlan,
        status_changed: bool,
    ) -> Result<DispatchReport, ApplicationError> {
        let deliveries = self.deliver(&correlation_id, context, plan).await;
        let status = context.chain.status();
        let failed = deliveries.iter().filter(|record| !record.delivered()).count();

        info!(
            event_name,
            correlation_id = %correlation_id,
            proposal_id = %context.proposal.id.0,
            dispatch_kind = %policy.kind(),
            status = status.as_str(),
            status_changed,
            notified = deliveries.len() - failed,
            failed,
            "lifecycle event dispatched"
        );

        Ok(DispatchReport {
            correlation_id,
            proposal_id: context.proposal.id.clone(),
            kind: policy.kind(),
            status,
            status_changed,
            deliveries,
        })
    }

    async fn deliver(
        &self,
        correlation_id: &str,
        context: &ProposalContext,
        plan: NotificationPlan,
    ) -> Vec<DeliveryRecord> {
        let proposal_status = context.chain.status();
        let mut records = Vec::with_capacity(plan.notices().len());

        for notice in plan.into_notices() {
            let mut access_token = None;
            if let (true, Some(step_id)) = (notice.issue_token, notice.step_id.as_ref()) {
                let issued = IssuedToken::generate();
                match self.store.record_token(step_id, issued.digest(), Utc::now()).await {
                    Ok(()) => access_token = Some(issued.expose().to_owned()),
                    Err(error) => {
                        warn!(
                            event_name = "notification.token_skipped",
                            correlation_id,
                            proposal_id = %context.proposal.id.0,
                            step_id = %step_id.0,
                            error = %error,
                            "approval request skipped; step no longer accepts tokens"
                        );
                        continue;
                    }
                }
            }

            let responder = match notice.template {
                TemplateKind::ApprovalRequested => None,
                _ => notice
                    .step_id
                    .as_ref()
                    .and_then(|step_id| context.chain.step(step_id))
                    .map(|step| step.approver.clone()),
            };
            let payload = NotificationPayload {
                proposal_id: context.proposal.id.clone(),
                public_id: context.proposal.public_id.clone(),
                proposal_name: context.proposal.name.clone(),
                proposal_status,
                step_id: notice.step_id.clone(),
                responder,
                access_token,
                message: notice.message.clone(),
            };

            let outcome = self.notifier.send(&notice.recipient, notice.template, &payload).await;
            if let Err(error) = &outcome {
                warn!(
                    event_name = "notification.delivery_failed",
                    correlation_id,
                    proposal_id = %context.proposal.id.0,
                    recipient = %notice.recipient,
                    template = notice.template.as_str(),
                    error = %error,
                    "notification delivery failed"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(context.proposal.id.clone()),
                        correlation_id,
                        "notification.delivery_failed",
                        AuditCategory::Notification,
                        ACTOR,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("recipient", notice.recipient.0.clone())
                    .with_metadata("template", notice.template.as_str())
                    .with_metadata("error", error.to_string()),
                );
            }

            records.push(DeliveryRecord {
                recipient: notice.recipient,
                template: notice.template,
                step_id: notice.step_id,
                outcome,
            });
        }

        records
    }
}

fn new_correlation_id() -> String {
    format!("dispatch-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{Dispatcher, LinkAction};
    use crate::audit::InMemoryAuditSink;
    use crate::dispatch::PolicySelector;
    use crate::domain::approval::ApprovalStep;
    use crate::domain::proposal::{Proposal, ProposalId, PublicId, UserId, WorkflowMode};
    use crate::errors::{ApplicationError, DomainError};
    use crate::notify::{RecordingNotificationPort, TemplateKind};
    use crate::store::{InMemoryProposalStore, NewSubmission, ProposalStore};

    async fn seeded(mode: WorkflowMode) -> (Dispatcher, RecordingNotificationPort, ProposalId) {
        let store = InMemoryProposalStore::default();
        let now = Utc::now();
        let proposal_id = ProposalId("P-UNIT".to_owned());
        store
            .insert_submission(NewSubmission {
                proposal: Proposal {
                    id: proposal_id.clone(),
                    public_id: PublicId("FY26-UNIT".to_owned()),
                    name: "toner".to_owned(),
                    workflow: mode,
                    client: None,
                    requester: UserId::new("requester@gsa.gov"),
                    predecessor_id: None,
                    created_at: now,
                },
                steps: vec![
                    ApprovalStep::pending(proposal_id.clone(), 1, UserId::new("a@gsa.gov"), now),
                    ApprovalStep::pending(proposal_id.clone(), 2, UserId::new("b@gsa.gov"), now),
                ],
                observations: Vec::new(),
            })
            .await
            .expect("seed");

        let notifier = RecordingNotificationPort::default();
        let dispatcher = Dispatcher::new(
            Arc::new(PolicySelector::default()),
            Arc::new(store),
            Arc::new(notifier.clone()),
            Arc::new(InMemoryAuditSink::default()),
        );
        (dispatcher, notifier, proposal_id)
    }

    #[test]
    fn link_action_parses_query_values() {
        assert_eq!("APPROVE".parse::<LinkAction>(), Ok(LinkAction::Approve));
        assert_eq!("reject".parse::<LinkAction>(), Ok(LinkAction::Reject));
        assert!(matches!(
            "maybe".parse::<LinkAction>(),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn approval_request_carries_a_fresh_token() {
        let (dispatcher, notifier, proposal_id) = seeded(WorkflowMode::Linear).await;
        dispatcher.on_proposal_created(&proposal_id).await.expect("created");

        let requests = notifier.sent_to("a@gsa.gov", TemplateKind::ApprovalRequested);
        assert_eq!(requests.len(), 1);
        let token = requests[0].payload.access_token.clone().expect("token issued");
        let step_id = requests[0].payload.step_id.clone().expect("step id");

        let step = dispatcher.store().find_step(&step_id).await.expect("find").expect("step");
        let digest = step.access_token_digest.expect("digest stored");
        assert!(crate::token::token_matches(&token, &digest));
    }

    #[tokio::test]
    async fn unknown_step_is_not_found() {
        let (dispatcher, _, _) = seeded(WorkflowMode::Parallel).await;
        let missing = crate::domain::approval::ApprovalStepId("APS-missing".to_owned());
        let error = dispatcher.on_approval_approved(&missing).await.expect_err("missing step");
        assert!(matches!(error, ApplicationError::NotFound { entity: "approval step", .. }));
    }
}
