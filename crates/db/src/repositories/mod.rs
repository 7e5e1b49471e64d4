use thiserror::Error;

use approvey_core::StoreError;

pub mod proposal;

pub use proposal::SqlProposalStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` changed concurrently")]
    Conflict { entity: &'static str, id: String },
    #[error("{entity} `{id}` was not found")]
    Missing { entity: &'static str, id: String },
    #[error("proposal `{id}` already has a rejection")]
    Rejected { id: String },
    #[error("proposal `{id}` already has a successor")]
    Superseded { id: String },
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { entity, id } => StoreError::Conflict { entity, id },
            RepositoryError::Missing { entity, id } => StoreError::Missing { entity, id },
            RepositoryError::Rejected { id } => StoreError::ProposalRejected { id },
            RepositoryError::Superseded { id } => StoreError::Superseded { id },
            other => StoreError::Backend(other.to_string()),
        }
    }
}
