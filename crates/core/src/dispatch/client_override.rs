use super::{
    creation_plan, linear_approval_plan, DispatchKind, DispatchPolicy, PolicySettings,
    ProposalContext,
};
use crate::domain::approval::ApprovalStep;
use crate::domain::proposal::ClientTag;
use crate::notify::NotificationPlan;

/// When a client wants the requester told about an approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeRule {
    EveryStep,
    /// Only the last step of the chain; intermediate sign-offs stay quiet.
    FinalStepOnly,
}

/// Linear walk with a client-specific approval notice rule.
#[derive(Clone, Debug)]
pub struct ClientOverridePolicy {
    client: ClientTag,
    settings: PolicySettings,
    notice_rule: NoticeRule,
}

impl ClientOverridePolicy {
    pub fn new(client: ClientTag, settings: PolicySettings, notice_rule: NoticeRule) -> Self {
        Self { client, settings, notice_rule }
    }

    /// NCR requesters hear about approvals only once the whole chain has signed off.
    pub fn ncr(settings: PolicySettings) -> Self {
        Self::new(ClientTag::ncr(), settings, NoticeRule::FinalStepOnly)
    }

    pub fn client(&self) -> &ClientTag {
        &self.client
    }
}

impl DispatchPolicy for ClientOverridePolicy {
    fn kind(&self) -> DispatchKind {
        DispatchKind::ClientOverride(self.client.clone())
    }

    fn requires_approval_notice(&self, context: &ProposalContext, step: &ApprovalStep) -> bool {
        match self.notice_rule {
            NoticeRule::EveryStep => true,
            NoticeRule::FinalStepOnly => context.chain.is_final_step(&step.id),
        }
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
