use thiserror::Error;

use crate::domain::approval::ApprovalStepId;
use crate::domain::proposal::{ProposalId, PublicId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown workflow mode `{mode}` (expected linear|parallel)")]
    UnknownWorkflowMode { mode: String },
    #[error("approval step `{}` was already resolved", step_id.0)]
    StepAlreadyResolved { step_id: ApprovalStepId },
    #[error("proposal `{}` was already rejected", proposal_id.0)]
    ProposalAlreadyRejected { proposal_id: ProposalId },
    #[error("approval step `{}` is waiting on step `{}`", step_id.0, waiting_on.0)]
    StepNotActionable { step_id: ApprovalStepId, waiting_on: ApprovalStepId },
    #[error("access token does not match approval step `{}`", step_id.0)]
    InvalidAccessToken { step_id: ApprovalStepId },
    #[error("proposal `{}` cannot be resubmitted because it was not rejected", proposal_id.0)]
    ProposalNotRejected { proposal_id: ProposalId },
    #[error("proposal `{}` was already resubmitted", proposal_id.0)]
    ProposalAlreadyResubmitted { proposal_id: ProposalId },
    #[error("public id `{}` already belongs to another proposal", public_id.0)]
    PublicIdInUse { public_id: PublicId },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// True for failures a caller should surface as a warning rather than a crash.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Domain(
                DomainError::StepAlreadyResolved { .. }
                    | DomainError::ProposalAlreadyRejected { .. }
                    | DomainError::StepNotActionable { .. }
                    | DomainError::InvalidAccessToken { .. }
                    | DomainError::ProposalAlreadyResubmitted { .. }
            )
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "This approval link is not valid for your account.",
            Self::NotFound { .. } => "The requested proposal or approval could not be found.",
            Self::Conflict { .. } => "This approval has already been responded to.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                let message = error.to_string();
                match error {
                    DomainError::StepAlreadyResolved { .. }
                    | DomainError::ProposalAlreadyRejected { .. }
                    | DomainError::StepNotActionable { .. }
                    | DomainError::ProposalNotRejected { .. }
                    | DomainError::ProposalAlreadyResubmitted { .. }
                    | DomainError::PublicIdInUse { .. } => {
                        Self::Conflict { message, correlation_id }
                    }
                    DomainError::InvalidAccessToken { .. } => {
                        Self::Unauthorized { message, correlation_id }
                    }
                    DomainError::UnknownWorkflowMode { .. } => {
                        Self::Internal { message, correlation_id }
                    }
                    DomainError::InvariantViolation(_) => {
                        Self::BadRequest { message, correlation_id }
                    }
                }
            }
            ApplicationError::NotFound { entity, id } => {
                Self::NotFound { message: format!("{entity} `{id}` was not found"), correlation_id }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
