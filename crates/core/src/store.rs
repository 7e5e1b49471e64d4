//! Persistence port for proposals and their approval chains.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::chain::StepResolution;
use crate::domain::approval::{ApprovalStep, ApprovalStepId, Rejection, StepStatus};
use crate::domain::comment::{Comment, CommentId};
use crate::domain::observation::Observation;
use crate::domain::proposal::{Proposal, ProposalId, PublicId};
use crate::errors::{ApplicationError, DomainError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The optimistic-lock check failed: the row moved on since it was read.
    #[error("{entity} `{id}` changed concurrently")]
    Conflict { entity: &'static str, id: String },
    #[error("{entity} `{id}` was not found")]
    Missing { entity: &'static str, id: String },
    /// Another step's rejection committed first; the chain accepts no more transitions.
    #[error("proposal `{id}` already has a rejection")]
    ProposalRejected { id: String },
    /// The predecessor already has a successor; a lineage never forks.
    #[error("proposal `{id}` already has a successor")]
    Superseded { id: String },
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Missing { entity, id } => Self::NotFound { entity, id },
            StoreError::ProposalRejected { id } => {
                Self::Domain(DomainError::ProposalAlreadyRejected { proposal_id: ProposalId(id) })
            }
            StoreError::Superseded { id } => Self::Domain(
                DomainError::ProposalAlreadyResubmitted { proposal_id: ProposalId(id) },
            ),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Everything created by one submission; persisted atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSubmission {
    pub proposal: Proposal,
    pub steps: Vec<ApprovalStep>,
    pub observations: Vec<Observation>,
}

#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Fails with [`StoreError::Superseded`] when the proposal's predecessor
    /// already has a successor.
    async fn insert_submission(&self, submission: NewSubmission) -> Result<(), StoreError>;

    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError>;

    async fn list_proposals_by_public_id(
        &self,
        public_id: &PublicId,
    ) -> Result<Vec<Proposal>, StoreError>;

    async fn find_step(&self, id: &ApprovalStepId) -> Result<Option<ApprovalStep>, StoreError>;

    async fn list_steps(&self, proposal_id: &ProposalId) -> Result<Vec<ApprovalStep>, StoreError>;

    /// Persists the transition only if the step is still pending at
    /// `expected_version` and its proposal has no rejection yet. A moved step is
    /// [`StoreError::Conflict`]; a rejected proposal is
    /// [`StoreError::ProposalRejected`]. A rejection record travels in the same
    /// write.
    ///
    /// Returns the proposal's steps as they stand right after this write, so the
    /// caller derives the aggregate status from committed state, not from its read.
    async fn resolve_step(
        &self,
        resolution: &StepResolution,
    ) -> Result<Vec<ApprovalStep>, StoreError>;

    /// Stores a new token digest on a still-pending step. Does not bump `version`.
    async fn record_token(
        &self,
        step_id: &ApprovalStepId,
        digest: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn list_observations(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Vec<Observation>, StoreError>;

    async fn find_rejection(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<Rejection>, StoreError>;

    async fn insert_comment(&self, comment: Comment) -> Result<(), StoreError>;

    async fn find_comment(&self, id: &CommentId) -> Result<Option<Comment>, StoreError>;
}

#[derive(Default)]
struct StoreState {
    proposals: HashMap<String, Proposal>,
    steps: HashMap<String, ApprovalStep>,
    observations: Vec<Observation>,
    rejections: HashMap<String, Rejection>,
    comments: HashMap<String, Comment>,
}

/// Process-local store with the same CAS contract as the SQL store.
#[derive(Clone, Default)]
pub struct InMemoryProposalStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryProposalStore {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ProposalStore for InMemoryProposalStore {
    async fn insert_submission(&self, submission: NewSubmission) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.proposals.contains_key(&submission.proposal.id.0) {
            return Err(StoreError::Conflict {
                entity: "proposal",
                id: submission.proposal.id.0.clone(),
            });
        }
        if let Some(predecessor) = &submission.proposal.predecessor_id {
            let forked = state
                .proposals
                .values()
                .any(|proposal| proposal.predecessor_id.as_ref() == Some(predecessor));
            if forked {
                return Err(StoreError::Superseded { id: predecessor.0.clone() });
            }
        }

        for step in submission.steps {
            state.steps.insert(step.id.0.clone(), step);
        }
        state.observations.extend(submission.observations);
        state.proposals.insert(submission.proposal.id.0.clone(), submission.proposal);
        Ok(())
    }

    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        Ok(self.state().proposals.get(&id.0).cloned())
    }

    async fn list_proposals_by_public_id(
        &self,
        public_id: &PublicId,
    ) -> Result<Vec<Proposal>, StoreError> {
        let mut proposals: Vec<Proposal> = self
            .state()
            .proposals
            .values()
            .filter(|proposal| &proposal.public_id == public_id)
            .cloned()
            .collect();
        proposals.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(proposals)
    }

    async fn find_step(&self, id: &ApprovalStepId) -> Result<Option<ApprovalStep>, StoreError> {
        Ok(self.state().steps.get(&id.0).cloned())
    }

    async fn list_steps(&self, proposal_id: &ProposalId) -> Result<Vec<ApprovalStep>, StoreError> {
        let mut steps: Vec<ApprovalStep> = self
            .state()
            .steps
            .values()
            .filter(|step| &step.proposal_id == proposal_id)
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.position);
        Ok(steps)
    }

    async fn resolve_step(
        &self,
        resolution: &StepResolution,
    ) -> Result<Vec<ApprovalStep>, StoreError> {
        let mut state = self.state();
        let step = state.steps.get(&resolution.step_id.0).ok_or_else(|| StoreError::Missing {
            entity: "approval step",
            id: resolution.step_id.0.clone(),
        })?;
        let proposal_id = step.proposal_id.clone();

        if step.status != StepStatus::Pending || step.version != resolution.expected_version {
            return Err(StoreError::Conflict {
                entity: "approval step",
                id: resolution.step_id.0.clone(),
            });
        }
        if state.rejections.contains_key(&proposal_id.0) {
            return Err(StoreError::ProposalRejected { id: proposal_id.0 });
        }

        if let Some(step) = state.steps.get_mut(&resolution.step_id.0) {
            step.status = resolution.status;
            step.responded_at = Some(resolution.responded_at);
            step.version += 1;
        }
        if let Some(rejection) = &resolution.rejection {
            state.rejections.insert(rejection.proposal_id.0.clone(), rejection.clone());
        }

        let mut committed: Vec<ApprovalStep> = state
            .steps
            .values()
            .filter(|step| step.proposal_id == proposal_id)
            .cloned()
            .collect();
        committed.sort_by_key(|step| step.position);
        Ok(committed)
    }

    async fn record_token(
        &self,
        step_id: &ApprovalStepId,
        digest: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let step = state
            .steps
            .get_mut(&step_id.0)
            .ok_or_else(|| StoreError::Missing { entity: "approval step", id: step_id.0.clone() })?;

        if step.status != StepStatus::Pending {
            return Err(StoreError::Conflict { entity: "approval step", id: step_id.0.clone() });
        }

        step.access_token_digest = Some(digest.to_owned());
        step.token_issued_at = Some(issued_at);
        Ok(())
    }

    async fn list_observations(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Vec<Observation>, StoreError> {
        Ok(self
            .state()
            .observations
            .iter()
            .filter(|observation| &observation.proposal_id == proposal_id)
            .cloned()
            .collect())
    }

    async fn find_rejection(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<Rejection>, StoreError> {
        Ok(self.state().rejections.get(&proposal_id.0).cloned())
    }

    async fn insert_comment(&self, comment: Comment) -> Result<(), StoreError> {
        self.state().comments.insert(comment.id.0.clone(), comment);
        Ok(())
    }

    async fn find_comment(&self, id: &CommentId) -> Result<Option<Comment>, StoreError> {
        Ok(self.state().comments.get(&id.0).cloned())
    }
}
