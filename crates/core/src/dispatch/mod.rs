//! Approval dispatch: which approvers act next and who hears about each event.
//!
//! ```text
//! lifecycle event -> Dispatcher -> PolicySelector -> DispatchPolicy -> NotificationPlan
//!                        |                                                  |
//!                   ProposalStore (CAS)                           NotificationPort fan-out
//! ```
//!
//! Policies are pure: they read a [`ProposalContext`] and return a
//! [`NotificationPlan`]. The [`Dispatcher`] owns every side effect.

pub mod client_override;
pub mod dispatcher;
pub mod linear;
pub mod parallel;
pub mod selector;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chain::ApprovalChain;
use crate::domain::approval::{ApprovalStep, Rejection};
use crate::domain::comment::Comment;
use crate::domain::observation::Observation;
use crate::domain::proposal::{ClientTag, Proposal};
use crate::notify::{Notice, NotificationPlan, TemplateKind};

pub use client_override::{ClientOverridePolicy, NoticeRule};
pub use dispatcher::{DispatchReport, Dispatcher, LinkAction, LinkOutcome, LinkResponse};
pub use linear::LinearPolicy;
pub use parallel::ParallelPolicy;
pub use selector::PolicySelector;

/// Closed set of dispatch shapes, resolved once per loaded proposal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "client", rename_all = "snake_case")]
pub enum DispatchKind {
    Linear,
    Parallel,
    ClientOverride(ClientTag),
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => f.write_str("linear"),
            Self::Parallel => f.write_str("parallel"),
            Self::ClientOverride(client) => write!(f, "linear:{client}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicySettings {
    /// Global switch for "an approver responded" notices to the requester.
    pub approval_notice: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self { approval_notice: true }
    }
}

/// Snapshot of one proposal as a policy sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalContext {
    pub proposal: Proposal,
    pub chain: ApprovalChain,
    pub observations: Vec<Observation>,
}

pub trait DispatchPolicy: Send + Sync {
    fn kind(&self) -> DispatchKind;

    fn requires_approval_notice(&self, _context: &ProposalContext, _step: &ApprovalStep) -> bool {
        true
    }

    fn on_proposal_created(&self, context: &ProposalContext) -> NotificationPlan;

    /// `context` already reflects the approved step.
    fn on_approval_approved(
        &self,
        context: &ProposalContext,
        step: &ApprovalStep,
    ) -> NotificationPlan;

    fn on_proposal_rejected(
        &self,
        context: &ProposalContext,
        rejection: &Rejection,
    ) -> NotificationPlan {
        let mut plan = NotificationPlan::default();
        plan.push(
            Notice::to(&context.proposal.requester, TemplateKind::ProposalRejected)
                .for_step(&rejection.step_id)
                .with_message(rejection.comment.clone()),
        );
        plan.extend(observer_notices(context));
        plan
    }

    fn on_comment_created(&self, context: &ProposalContext, comment: &Comment) -> NotificationPlan {
        let mut plan = NotificationPlan::default();
        plan.extend(comment_listener_notices(context, comment));
        plan
    }

    fn on_proposal_update(&self, _context: &ProposalContext) -> NotificationPlan {
        NotificationPlan::default()
    }

    fn request_approver_action(
        &self,
        _context: &ProposalContext,
        step: &ApprovalStep,
    ) -> NotificationPlan {
        let mut plan = NotificationPlan::default();
        plan.push(Notice::approval_requested(&step.approver, &step.id));
        plan
    }
}

pub(crate) fn observer_notices(context: &ProposalContext) -> Vec<Notice> {
    context
        .observations
        .iter()
        .map(|observation| Notice::to(&observation.observer, TemplateKind::ObserverUpdate))
        .collect()
}

/// Requester, every approver, and observers who opted in; never the author.
pub(crate) fn comment_listener_notices(
    context: &ProposalContext,
    comment: &Comment,
) -> Vec<Notice> {
    let observers = context
        .observations
        .iter()
        .filter(|observation| observation.notify_on_comment)
        .map(|observation| &observation.observer);

    std::iter::once(&context.proposal.requester)
        .chain(context.chain.approvers())
        .chain(observers)
        .filter(|listener| **listener != comment.author)
        .map(|listener| {
            Notice::to(listener, TemplateKind::CommentAdded).with_message(comment.body.clone())
        })
        .collect()
}

/// Shared linear walk; `notify_requester` is the policy's notice decision.
pub(crate) fn linear_approval_plan(
    context: &ProposalContext,
    step: &ApprovalStep,
    notify_requester: bool,
) -> NotificationPlan {
    let mut plan = NotificationPlan::default();
    if notify_requester {
        plan.push(
            Notice::to(&context.proposal.requester, TemplateKind::ApprovalReplyReceived)
                .for_step(&step.id),
        );
    }
    plan.extend(observer_notices(context));
    for next in context.chain.actionable() {
        plan.push(Notice::approval_requested(&next.approver, &next.id));
    }
    plan
}

pub(crate) fn creation_plan(context: &ProposalContext) -> NotificationPlan {
    let mut plan = NotificationPlan::default();
    plan.extend(observer_notices(context));
    plan.push(Notice::to(&context.proposal.requester, TemplateKind::ProposalCreatedConfirmation));
    for step in context.chain.actionable() {
        plan.push(Notice::approval_requested(&step.approver, &step.id));
    }
    plan
}
