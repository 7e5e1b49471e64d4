use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::proposal::{ProposalId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub proposal_id: ProposalId,
    pub author: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(
        proposal_id: ProposalId,
        author: UserId,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CommentId(format!("CMT-{}", Uuid::new_v4().simple())),
            proposal_id,
            author,
            body: body.into(),
            created_at,
        }
    }
}
