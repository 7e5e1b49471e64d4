pub mod audit;
pub mod chain;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod store;
pub mod submission;
pub mod token;

pub use chain::{ApprovalChain, StepResolution};
pub use dispatch::{
    DispatchKind, DispatchPolicy, DispatchReport, Dispatcher, LinkAction, LinkOutcome,
    LinkResponse, PolicySelector, PolicySettings, ProposalContext,
};
pub use domain::approval::{ApprovalStep, ApprovalStepId, Rejection, StepStatus};
pub use domain::comment::{Comment, CommentId};
pub use domain::observation::{Observation, ObservationId};
pub use domain::proposal::{
    ClientTag, Proposal, ProposalId, ProposalStatus, PublicId, UserId, WorkflowMode,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use notify::{
    DeliveryError, DeliveryReceipt, DeliveryRecord, NotificationPayload, NotificationPort,
    RecordingNotificationPort, TemplateKind,
};
pub use store::{InMemoryProposalStore, NewSubmission, ProposalStore, StoreError};
pub use submission::{
    ChainBuilder, ExpenseType, NcrMailboxes, ObserverRequest, SubmissionOutcome,
    SubmissionRequest, SubmissionService,
};
