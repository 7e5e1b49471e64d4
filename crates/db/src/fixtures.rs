use chrono::Utc;

use approvey_core::domain::approval::{ApprovalStep, ApprovalStepId};
use approvey_core::domain::observation::Observation;
use approvey_core::domain::proposal::{
    ClientTag, Proposal, ProposalId, PublicId, UserId, WorkflowMode,
};
use approvey_core::submission::NcrChainBuilder;
use approvey_core::{
    ChainBuilder, ExpenseType, NcrMailboxes, NewSubmission, ProposalStore, StoreError,
    SubmissionRequest,
};

use crate::SqlProposalStore;

/// Demo proposals covering each dispatch kind.
const SEED_PROPOSALS: &[SeedProposalContract] = &[
    SeedProposalContract {
        flow_type: "linear",
        proposal_id: "P-SEED-LINEAR-001",
        public_id: "FY26-5eed0001",
        name: "Ergonomic chairs for the Denver office",
        workflow: WorkflowMode::Linear,
        client: None,
        approvers: &["approver1@approvey.local", "approver2@approvey.local"],
        observers: &[],
        ncr_expense: None,
        description: "two approvers responding in order",
    },
    SeedProposalContract {
        flow_type: "parallel",
        proposal_id: "P-SEED-PARALLEL-001",
        public_id: "FY26-5eed0002",
        name: "Replacement laptops for the field team",
        workflow: WorkflowMode::Parallel,
        client: None,
        approvers: &[
            "approver1@approvey.local",
            "approver2@approvey.local",
            "approver3@approvey.local",
        ],
        observers: &[("watcher@approvey.local", true)],
        ncr_expense: None,
        description: "three approvers responding in any order, one observer",
    },
    SeedProposalContract {
        flow_type: "ncr",
        proposal_id: "P-SEED-NCR-001",
        public_id: "FY26-5eed0003",
        name: "Facilities repair (BA80)",
        workflow: WorkflowMode::Linear,
        client: Some(ClientTag::NCR),
        approvers: &["ncr-approver@approvey.local"],
        observers: &[],
        ncr_expense: Some(ExpenseType::Ba80),
        description: "NCR BA80 chain ending at the budget office",
    },
];

const SEED_REQUESTER: &str = "requester@approvey.local";

#[derive(Debug, Clone, Copy)]
struct SeedProposalContract {
    flow_type: &'static str,
    proposal_id: &'static str,
    public_id: &'static str,
    name: &'static str,
    workflow: WorkflowMode,
    client: Option<&'static str>,
    approvers: &'static [&'static str],
    observers: &'static [(&'static str, bool)],
    ncr_expense: Option<ExpenseType>,
    description: &'static str,
}

impl SeedProposalContract {
    fn chain(&self, mailboxes: &NcrMailboxes) -> Result<Vec<UserId>, StoreError> {
        let approvers: Vec<UserId> = self.approvers.iter().map(UserId::new).collect();
        let Some(expense) = self.ncr_expense else {
            return Ok(approvers);
        };

        let request = SubmissionRequest {
            name: self.name.to_string(),
            requester: UserId::new(SEED_REQUESTER),
            workflow: self.workflow.as_str().to_string(),
            client: self.client.map(ClientTag::new),
            approvers,
            observers: Vec::new(),
            expense_type: Some(expense),
            emergency: false,
            public_id: None,
        };
        NcrChainBuilder::new(mailboxes.clone())
            .build(&request)
            .map_err(|error| {
                StoreError::Backend(format!("seed chain `{}`: {error}", self.flow_type))
            })
    }

    fn submission(&self, mailboxes: &NcrMailboxes) -> Result<NewSubmission, StoreError> {
        let now = Utc::now();
        let proposal_id = ProposalId(self.proposal_id.to_string());
        let steps = self
            .chain(mailboxes)?
            .into_iter()
            .enumerate()
            .map(|(index, approver)| {
                let position = index as u32 + 1;
                let mut step = ApprovalStep::pending(proposal_id.clone(), position, approver, now);
                step.id = ApprovalStepId(format!("{}-S{position}", self.proposal_id));
                step
            })
            .collect();
        let observations = self
            .observers
            .iter()
            .map(|(observer, notify)| {
                Observation::new(proposal_id.clone(), UserId::new(observer), *notify, now)
            })
            .collect();

        Ok(NewSubmission {
            proposal: Proposal {
                id: proposal_id,
                public_id: PublicId(self.public_id.to_string()),
                name: self.name.to_string(),
                workflow: self.workflow,
                client: self.client.map(ClientTag::new),
                requester: UserId::new(SEED_REQUESTER),
                predecessor_id: None,
                created_at: now,
            },
            steps,
            observations,
        })
    }
}

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// Inserts missing demo proposals; existing ones are left untouched.
    pub async fn load(
        store: &SqlProposalStore,
        mailboxes: &NcrMailboxes,
    ) -> Result<SeedResult, StoreError> {
        let mut seeded = Vec::new();
        for contract in SEED_PROPOSALS {
            let id = ProposalId(contract.proposal_id.to_string());
            let inserted = if store.find_proposal(&id).await?.is_some() {
                false
            } else {
                store.insert_submission(contract.submission(mailboxes)?).await?;
                true
            };
            seeded.push(SeedInfo {
                flow_type: contract.flow_type,
                proposal_id: contract.proposal_id,
                description: contract.description,
                inserted,
            });
        }
        Ok(SeedResult { proposals: seeded })
    }

    pub async fn verify(
        store: &SqlProposalStore,
        mailboxes: &NcrMailboxes,
    ) -> Result<VerificationResult, StoreError> {
        let mut checks = Vec::new();
        for contract in SEED_PROPOSALS {
            let id = ProposalId(contract.proposal_id.to_string());
            let expected_steps = contract.chain(mailboxes)?.len();
            let present = store.find_proposal(&id).await?.is_some()
                && store.list_steps(&id).await?.len() == expected_steps;
            checks.push((contract.flow_type, present));
        }
        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub proposals: Vec<SeedInfo>,
}

#[derive(Debug)]
pub struct SeedInfo {
    pub flow_type: &'static str,
    pub proposal_id: &'static str,
    pub description: &'static str,
    pub inserted: bool,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
