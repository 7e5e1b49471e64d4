//! Approval chain state machine.
//!
//! An [`ApprovalChain`] is an ordered view over one proposal's steps. It owns the
//! rules for which steps may respond and how the aggregate status is derived; it
//! never persists anything. Transitions come back as [`StepResolution`] values that
//! the store applies with compare-and-set semantics.

use chrono::{DateTime, Utc};

use crate::domain::approval::{ApprovalStep, ApprovalStepId, Rejection, StepStatus};
use crate::domain::proposal::{ProposalId, ProposalStatus, UserId, WorkflowMode};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalChain {
    proposal_id: ProposalId,
    mode: WorkflowMode,
    steps: Vec<ApprovalStep>,
}

/// A pending step's single allowed mutation, ready to be persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepResolution {
    pub step_id: ApprovalStepId,
    pub expected_version: u32,
    pub status: StepStatus,
    pub responded_at: DateTime<Utc>,
    pub rejection: Option<Rejection>,
}

impl ApprovalChain {
    pub fn new(proposal_id: ProposalId, mode: WorkflowMode, mut steps: Vec<ApprovalStep>) -> Self {
        steps.sort_by_key(|step| step.position);
        Self { proposal_id, mode, steps }
    }

    pub fn proposal_id(&self) -> &ProposalId {
        &self.proposal_id
    }

    pub fn mode(&self) -> WorkflowMode {
        self.mode
    }

    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }

    pub fn step(&self, step_id: &ApprovalStepId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| &step.id == step_id)
    }

    pub fn approvers(&self) -> impl Iterator<Item = &UserId> {
        self.steps.iter().map(|step| &step.approver)
    }

    pub fn status(&self) -> ProposalStatus {
        if self.steps.iter().any(|step| step.status == StepStatus::Rejected) {
            ProposalStatus::Rejected
        } else if self.steps.iter().all(|step| step.status == StepStatus::Approved) {
            ProposalStatus::Approved
        } else {
            ProposalStatus::Pending
        }
    }

    /// Steps whose approver is currently expected to act.
    pub fn actionable(&self) -> Vec<&ApprovalStep> {
        if self.status() != ProposalStatus::Pending {
            return Vec::new();
        }

        match self.mode {
            WorkflowMode::Linear => {
                let current = self.steps.iter().find(|step| step.status == StepStatus::Pending);
                current.into_iter().collect()
            }
            WorkflowMode::Parallel => {
                self.steps.iter().filter(|step| step.status == StepStatus::Pending).collect()
            }
        }
    }

    pub fn is_final_step(&self, step_id: &ApprovalStepId) -> bool {
        self.steps.last().map(|step| &step.id == step_id).unwrap_or(false)
    }

    /// Checked in order: already resolved, proposal rejected, out of turn.
    pub fn ensure_can_respond(
        &self,
        step_id: &ApprovalStepId,
    ) -> Result<&ApprovalStep, DomainError> {
        let step = self.step(step_id).ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "step `{}` does not belong to proposal `{}`",
                step_id.0, self.proposal_id.0
            ))
        })?;

        if step.status.is_terminal() {
            return Err(DomainError::StepAlreadyResolved { step_id: step.id.clone() });
        }

        if self.status() == ProposalStatus::Rejected {
            return Err(DomainError::ProposalAlreadyRejected {
                proposal_id: self.proposal_id.clone(),
            });
        }

        if self.mode == WorkflowMode::Linear {
            if let Some(current) = self.actionable().first() {
                if current.id != step.id {
                    return Err(DomainError::StepNotActionable {
                        step_id: step.id.clone(),
                        waiting_on: current.id.clone(),
                    });
                }
            }
        }

        Ok(step)
    }

    pub fn approve(
        &self,
        step_id: &ApprovalStepId,
        at: DateTime<Utc>,
    ) -> Result<StepResolution, DomainError> {
        let step = self.ensure_can_respond(step_id)?;
        Ok(StepResolution {
            step_id: step.id.clone(),
            expected_version: step.version,
            status: StepStatus::Approved,
            responded_at: at,
            rejection: None,
        })
    }

    pub fn reject(
        &self,
        step_id: &ApprovalStepId,
        comment: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<StepResolution, DomainError> {
        let step = self.ensure_can_respond(step_id)?;
        Ok(StepResolution {
            step_id: step.id.clone(),
            expected_version: step.version,
            status: StepStatus::Rejected,
            responded_at: at,
            rejection: Some(Rejection {
                proposal_id: self.proposal_id.clone(),
                step_id: step.id.clone(),
                approver: step.approver.clone(),
                comment: comment.into(),
                rejected_at: at,
            }),
        })
    }

    /// Applies a resolution the store has already accepted.
    #[cfg(test)]
    pub(crate) fn apply(&mut self, resolution: &StepResolution) {
        if let Some(step) = self.steps.iter_mut().find(|step| step.id == resolution.step_id) {
            step.status = resolution.status;
            step.responded_at = Some(resolution.responded_at);
            step.version = resolution.expected_version + 1;
        }
    }
}
