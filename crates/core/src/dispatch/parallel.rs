use super::{
    creation_plan, observer_notices, DispatchKind, DispatchPolicy, PolicySettings, ProposalContext,
};
use crate::domain::approval::ApprovalStep;
use crate::notify::{Notice, NotificationPlan, TemplateKind};

/// Every approver is asked up front; approvals never activate anyone new.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelPolicy {
    settings: PolicySettings,
}

impl ParallelPolicy {
    pub fn new(settings: PolicySettings) -> Self {
        Self { settings }
    }
}

impl DispatchPolicy for ParallelPolicy {
    fn kind(&self) -> DispatchKind {
        DispatchKind::Parallel
    }

    fn on_proposal_created(&self, context: &ProposalContext) -> NotificationPlan {
        creation_plan(context)
    }

    fn on_approval_approved(
        &self,
        context: &ProposalContext,
        step: &ApprovalStep,
    ) -> NotificationPlan {
        let mut plan = NotificationPlan::default();
        if self.settings.approval_notice && self.requires_approval_notice(context, step) {
            plan.push(
                Notice::to(&context.proposal.requester, TemplateKind::ApprovalReplyReceived)
                    .for_step(&step.id),
            );
        }
        plan.extend(observer_notices(context));
        plan
    }
}
