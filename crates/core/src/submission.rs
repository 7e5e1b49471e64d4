//! Proposal intake: chain construction, resubmission after rejection, comments.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::chain::ApprovalChain;
use crate::config::NcrConfig;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::domain::approval::ApprovalStep;
use crate::domain::comment::Comment;
use crate::domain::observation::Observation;
use crate::domain::proposal::{
    generate_public_id, ClientTag, Proposal, ProposalId, ProposalStatus, PublicId, UserId,
    WorkflowMode,
};
use crate::errors::{ApplicationError, DomainError};
use crate::store::{NewSubmission, ProposalStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpenseType {
    #[serde(rename = "BA60")]
    Ba60,
    #[serde(rename = "BA61")]
    Ba61,
    #[serde(rename = "BA80")]
    Ba80,
}

impl ExpenseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ba60 => "BA60",
            Self::Ba61 => "BA61",
            Self::Ba80 => "BA80",
        }
    }
}

impl fmt::Display for ExpenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpenseType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BA60" => Ok(Self::Ba60),
            "BA61" => Ok(Self::Ba61),
            "BA80" => Ok(Self::Ba80),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported expense type `{other}` (expected BA60|BA61|BA80)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverRequest {
    pub user: UserId,
    #[serde(default)]
    pub notify_on_comment: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub name: String,
    pub requester: UserId,
    /// Raw workflow mode; parsed strictly.
    pub workflow: String,
    #[serde(default)]
    pub client: Option<ClientTag>,
    #[serde(default)]
    pub approvers: Vec<UserId>,
    #[serde(default)]
    pub observers: Vec<ObserverRequest>,
    #[serde(default)]
    pub expense_type: Option<ExpenseType>,
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub public_id: Option<PublicId>,
}

/// Turns a submission into the ordered approvers of its chain.
pub trait ChainBuilder: Send + Sync {
    fn build(&self, request: &SubmissionRequest) -> Result<Vec<UserId>, DomainError>;
}

/// Approvers exactly as submitted, minus repeats.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultChainBuilder;

impl ChainBuilder for DefaultChainBuilder {
    fn build(&self, request: &SubmissionRequest) -> Result<Vec<UserId>, DomainError> {
        Ok(dedupe(request.approvers.iter().cloned()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NcrMailboxes {
    pub ba80: UserId,
    pub ba61_tier1: UserId,
    pub ba61_tier2: UserId,
}

impl From<&NcrConfig> for NcrMailboxes {
    fn from(config: &NcrConfig) -> Self {
        Self {
            ba80: UserId::new(&config.ba80_budget_mailbox),
            ba61_tier1: UserId::new(&config.ba61_tier1_budget_mailbox),
            ba61_tier2: UserId::new(&config.ba61_tier2_budget_mailbox),
        }
    }
}

/// One human approver followed by the budget offices for the expense type.
#[derive(Clone, Debug)]
pub struct NcrChainBuilder {
    mailboxes: NcrMailboxes,
}

impl NcrChainBuilder {
    pub fn new(mailboxes: NcrMailboxes) -> Self {
        Self { mailboxes }
    }
}

impl ChainBuilder for NcrChainBuilder {
    fn build(&self, request: &SubmissionRequest) -> Result<Vec<UserId>, DomainError> {
        let expense = request.expense_type.ok_or_else(|| {
            DomainError::InvariantViolation("ncr submissions require an expense_type".to_string())
        })?;

        if expense == ExpenseType::Ba61 && request.emergency {
            return Ok(Vec::new());
        }

        let humans = dedupe(request.approvers.iter().cloned());
        let [approver] = humans.as_slice() else {
            return Err(DomainError::InvariantViolation(format!(
                "ncr submissions need exactly one approver, got {}",
                humans.len()
            )));
        };

        let budget = match expense {
            ExpenseType::Ba80 => vec![self.mailboxes.ba80.clone()],
            ExpenseType::Ba60 | ExpenseType::Ba61 => {
                vec![self.mailboxes.ba61_tier1.clone(), self.mailboxes.ba61_tier2.clone()]
            }
        };

        Ok(dedupe(std::iter::once(approver.clone()).chain(budget)))
    }
}

fn dedupe(users: impl IntoIterator<Item = UserId>) -> Vec<UserId> {
    let mut ordered: Vec<UserId> = Vec::new();
    for user in users {
        if !user.as_str().is_empty() && !ordered.contains(&user) {
            ordered.push(user);
        }
    }
    ordered
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub proposal: Proposal,
    pub report: DispatchReport,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentOutcome {
    pub comment: Comment,
    pub report: DispatchReport,
}

pub struct SubmissionService {
    dispatcher: Arc<Dispatcher>,
    audit: Arc<dyn AuditSink>,
    default_builder: Arc<dyn ChainBuilder>,
    client_builders: HashMap<ClientTag, Arc<dyn ChainBuilder>>,
}

impl SubmissionService {
    /// Default chains plus the NCR builder for client `ncr`.
    pub fn new(dispatcher: Arc<Dispatcher>, audit: Arc<dyn AuditSink>, ncr: NcrMailboxes) -> Self {
        Self {
            dispatcher,
            audit,
            default_builder: Arc::new(DefaultChainBuilder),
            client_builders: HashMap::new(),
        }
        .with_builder(ClientTag::ncr(), Arc::new(NcrChainBuilder::new(ncr)))
    }

    pub fn with_builder(mut self, client: ClientTag, builder: Arc<dyn ChainBuilder>) -> Self {
        self.client_builders.insert(client, builder);
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn submit(
        &self,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, ApplicationError> {
        let public_id = match request.public_id.clone() {
            Some(public_id) => {
                if !self.store().list_proposals_by_public_id(&public_id).await?.is_empty() {
                    return Err(DomainError::PublicIdInUse { public_id }.into());
                }
                public_id
            }
            None => generate_public_id(Utc::now()),
        };
        self.create(request, public_id, None).await
    }

    /// Starts a fresh chain for a rejected proposal under the same public id.
    ///
    /// Only the newest proposal of a lineage can be resubmitted, and only once.
    pub async fn resubmit(
        &self,
        previous_id: &ProposalId,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, ApplicationError> {
        let store = self.store();
        let previous = store
            .find_proposal(previous_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("proposal", previous_id.0.clone()))?;
        let steps = store.list_steps(previous_id).await?;
        let chain = ApprovalChain::new(previous.id.clone(), previous.workflow, steps);
        if chain.status() != ProposalStatus::Rejected {
            return Err(DomainError::ProposalNotRejected { proposal_id: previous.id }.into());
        }
        let lineage = store.list_proposals_by_public_id(&previous.public_id).await?;
        if lineage.iter().any(|proposal| proposal.predecessor_id.as_ref() == Some(&previous.id)) {
            return Err(DomainError::ProposalAlreadyResubmitted { proposal_id: previous.id }.into());
        }

        self.create(request, previous.public_id, Some(previous.id)).await
    }

    pub async fn add_comment(
        &self,
        proposal_id: &ProposalId,
        author: UserId,
        body: &str,
    ) -> Result<CommentOutcome, ApplicationError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(DomainError::InvariantViolation("comment body is empty".to_string()).into());
        }
        let store = self.store();
        if store.find_proposal(proposal_id).await?.is_none() {
            return Err(ApplicationError::not_found("proposal", proposal_id.0.clone()));
        }

        let comment = Comment::new(proposal_id.clone(), author, body, Utc::now());
        store.insert_comment(comment.clone()).await?;
        self.audit.emit(
            AuditEvent::new(
                Some(proposal_id.clone()),
                comment.id.0.clone(),
                "comment.added",
                AuditCategory::Comment,
                comment.author.as_str(),
                AuditOutcome::Success,
            )
            .with_metadata("comment_id", comment.id.0.clone()),
        );

        let report = self.dispatcher.on_comment_created(&comment.id).await?;
        Ok(CommentOutcome { comment, report })
    }

    fn store(&self) -> &Arc<dyn ProposalStore> {
        self.dispatcher.store()
    }

    async fn create(
        &self,
        request: SubmissionRequest,
        public_id: PublicId,
        predecessor_id: Option<ProposalId>,
    ) -> Result<SubmissionOutcome, ApplicationError> {
        let workflow: WorkflowMode = request.workflow.parse()?;
        let name = request.name.trim();
        if name.is_empty() {
            let error = DomainError::InvariantViolation("proposal name is empty".to_string());
            return Err(error.into());
        }
        if request.requester.as_str().is_empty() {
            return Err(DomainError::InvariantViolation("requester is empty".to_string()).into());
        }

        let builder = request
            .client
            .as_ref()
            .and_then(|client| self.client_builders.get(client))
            .unwrap_or(&self.default_builder);
        let approvers = builder.build(&request)?;

        let now = Utc::now();
        let proposal = Proposal {
            id: Proposal::new_id(),
            public_id,
            name: name.to_string(),
            workflow,
            client: request.client.clone(),
            requester: request.requester.clone(),
            predecessor_id,
            created_at: now,
        };
        let steps = approvers
            .into_iter()
            .enumerate()
            .map(|(index, approver)| {
                ApprovalStep::pending(proposal.id.clone(), index as u32 + 1, approver, now)
            })
            .collect::<Vec<_>>();
        let observations = request
            .observers
            .iter()
            .map(|observer| {
                Observation::new(
                    proposal.id.clone(),
                    observer.user.clone(),
                    observer.notify_on_comment,
                    now,
                )
            })
            .collect();

        let step_count = steps.len();
        self.store()
            .insert_submission(NewSubmission { proposal: proposal.clone(), steps, observations })
            .await?;

        info!(
            event_name = "proposal.submitted",
            proposal_id = %proposal.id.0,
            public_id = %proposal.public_id.0,
            workflow = workflow.as_str(),
            step_count,
            resubmission = proposal.predecessor_id.is_some(),
            "proposal submitted"
        );
        let mut event = AuditEvent::new(
            Some(proposal.id.clone()),
            proposal.public_id.0.clone(),
            "proposal.submitted",
            AuditCategory::Submission,
            proposal.requester.as_str(),
            AuditOutcome::Success,
        )
        .with_metadata("workflow", workflow.as_str())
        .with_metadata("step_count", step_count.to_string());
        if let Some(predecessor) = &proposal.predecessor_id {
            event = event.with_metadata("predecessor_id", predecessor.0.clone());
        }
        self.audit.emit(event);

        let report = self.dispatcher.on_proposal_created(&proposal.id).await?;
        Ok(SubmissionOutcome { proposal, report })
    }
}
