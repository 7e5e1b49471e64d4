use super::{
    creation_plan, linear_approval_plan, DispatchKind, DispatchPolicy, PolicySettings,
    ProposalContext,
};
use crate::domain::approval::ApprovalStep;
use crate::notify::NotificationPlan;

/// Serial chain: only the first pending step is ever asked to act.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearPolicy {
    settings: PolicySettings,
}

impl LinearPolicy {
    pub fn new(settings: PolicySettings) -> Self {
        Self { settings }
    }
}

impl DispatchPolicy for LinearPolicy {
    fn kind(&self) -> DispatchKind {
        DispatchKind::Linear
    }

    fn on_proposal_created(&self, context: &ProposalContext) -> NotificationPlan {
        creation_plan(context)
    }

    fn on_approval_approved(
        &self,
        context: &ProposalContext,
        step: &ApprovalStep,
    ) -> NotificationPlan {
        let notify_requester =
            self.settings.approval_notice && self.requires_approval_notice(context, step);
        linear_approval_plan(context, step, notify_requester)
    }
}
