use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::proposal::{ProposalId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationId(pub String);

/// A watcher who hears about major events but cannot approve or reject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub proposal_id: ProposalId,
    pub observer: UserId,
    pub notify_on_comment: bool,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(
        proposal_id: ProposalId,
        observer: UserId,
        notify_on_comment: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ObservationId(format!("OBS-{}", Uuid::new_v4().simple())),
            proposal_id,
            observer,
            notify_on_comment,
            created_at,
        }
    }
}
