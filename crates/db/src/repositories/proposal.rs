use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::Row;

use approvey_core::domain::approval::{ApprovalStep, ApprovalStepId, Rejection, StepStatus};
use approvey_core::domain::comment::{Comment, CommentId};
use approvey_core::domain::observation::{Observation, ObservationId};
use approvey_core::domain::proposal::{
    ClientTag, Proposal, ProposalId, PublicId, UserId, WorkflowMode,
};
use approvey_core::{NewSubmission, ProposalStore, StepResolution, StoreError};

use super::RepositoryError;
use crate::DbPool;

const PROPOSAL_COLUMNS: &str =
    "id, public_id, name, workflow, client, requester, predecessor_id, created_at";
const STEP_COLUMNS: &str = "id, proposal_id, position, approver, status, access_token_digest,
     token_issued_at, responded_at, version, created_at";

/// SQLite-backed [`ProposalStore`]. Step transitions are guarded by a
/// `status = 'pending' AND version = ?` predicate so concurrent responders race
/// on a single row update.
#[derive(Clone)]
pub struct SqlProposalStore {
    pool: DbPool,
}

impl SqlProposalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Explains why a guarded step update touched no rows.
    ///
    /// The step's own state wins over the proposal's: a step that already moved
    /// on is a conflict even when the proposal was also rejected.
    async fn lost_race(
        &self,
        step_id: &ApprovalStepId,
        expected_version: Option<u32>,
    ) -> RepositoryError {
        let row = sqlx::query(
            "SELECT s.status, s.version, s.proposal_id,
                    EXISTS (SELECT 1 FROM rejection r WHERE r.proposal_id = s.proposal_id)
                        AS rejected
             FROM approval_step s
             WHERE s.id = ?",
        )
        .bind(&step_id.0)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => diagnose_lost_race(&row, step_id, expected_version)
                .unwrap_or_else(|error| error),
            Ok(None) => RepositoryError::Missing { entity: "approval step", id: step_id.0.clone() },
            Err(error) => RepositoryError::Database(error),
        }
    }
}

fn diagnose_lost_race(
    row: &SqliteRow,
    step_id: &ApprovalStepId,
    expected_version: Option<u32>,
) -> Result<RepositoryError, RepositoryError> {
    let status: String = column(row, "status")?;
    let version: i64 = column(row, "version")?;
    let rejected: i64 = column(row, "rejected")?;
    let proposal_id: String = column(row, "proposal_id")?;

    let moved_on = status != StepStatus::Pending.as_str()
        || expected_version.is_some_and(|expected| i64::from(expected) != version);
    if !moved_on && rejected != 0 {
        return Ok(RepositoryError::Rejected { id: proposal_id });
    }
    Ok(RepositoryError::Conflict { entity: "approval step", id: step_id.0.clone() })
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn optional_timestamp(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    column::<Option<String>>(row, name)?.map(|raw| parse_timestamp(name, &raw)).transpose()
}

fn row_to_proposal(row: &SqliteRow) -> Result<Proposal, RepositoryError> {
    let workflow = column::<String>(row, "workflow")?
        .parse::<WorkflowMode>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at = parse_timestamp("created_at", &column::<String>(row, "created_at")?)?;

    Ok(Proposal {
        id: ProposalId(column(row, "id")?),
        public_id: PublicId(column(row, "public_id")?),
        name: column(row, "name")?,
        workflow,
        client: column::<Option<String>>(row, "client")?.map(ClientTag::new),
        requester: UserId::new(column::<String>(row, "requester")?),
        predecessor_id: column::<Option<String>>(row, "predecessor_id")?.map(ProposalId),
        created_at,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let status_raw: String = column(row, "status")?;
    let status = StepStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("status: unknown `{status_raw}`")))?;
    let position = u32::try_from(column::<i64>(row, "position")?)
        .map_err(|e| RepositoryError::Decode(format!("position: {e}")))?;
    let version = u32::try_from(column::<i64>(row, "version")?)
        .map_err(|e| RepositoryError::Decode(format!("version: {e}")))?;

    Ok(ApprovalStep {
        id: ApprovalStepId(column(row, "id")?),
        proposal_id: ProposalId(column(row, "proposal_id")?),
        position,
        approver: UserId::new(column::<String>(row, "approver")?),
        status,
        access_token_digest: column(row, "access_token_digest")?,
        token_issued_at: optional_timestamp(row, "token_issued_at")?,
        responded_at: optional_timestamp(row, "responded_at")?,
        version,
        created_at: parse_timestamp("created_at", &column::<String>(row, "created_at")?)?,
    })
}

fn row_to_observation(row: &SqliteRow) -> Result<Observation, RepositoryError> {
    Ok(Observation {
        id: ObservationId(column(row, "id")?),
        proposal_id: ProposalId(column(row, "proposal_id")?),
        observer: UserId::new(column::<String>(row, "observer")?),
        notify_on_comment: column(row, "notify_on_comment")?,
        created_at: parse_timestamp("created_at", &column::<String>(row, "created_at")?)?,
    })
}

fn row_to_comment(row: &SqliteRow) -> Result<Comment, RepositoryError> {
    Ok(Comment {
        id: CommentId(column(row, "id")?),
        proposal_id: ProposalId(column(row, "proposal_id")?),
        author: UserId::new(column::<String>(row, "author")?),
        body: column(row, "body")?,
        created_at: parse_timestamp("created_at", &column::<String>(row, "created_at")?)?,
    })
}

fn row_to_rejection(row: &SqliteRow) -> Result<Rejection, RepositoryError> {
    Ok(Rejection {
        proposal_id: ProposalId(column(row, "proposal_id")?),
        step_id: ApprovalStepId(column(row, "step_id")?),
        approver: UserId::new(column::<String>(row, "approver")?),
        comment: column(row, "comment")?,
        rejected_at: parse_timestamp("rejected_at", &column::<String>(row, "rejected_at")?)?,
    })
}

/// Maps unique violations on insert: a reused id is a conflict, a second
/// successor of the same predecessor is a forked lineage.
fn duplicate_proposal(proposal: &Proposal) -> impl FnOnce(sqlx::Error) -> RepositoryError + '_ {
    move |error| match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            match &proposal.predecessor_id {
                Some(predecessor) if db.message().contains("predecessor_id") => {
                    RepositoryError::Superseded { id: predecessor.0.clone() }
                }
                _ => RepositoryError::Conflict { entity: "proposal", id: proposal.id.0.clone() },
            }
        }
        _ => RepositoryError::Database(error),
    }
}

#[async_trait]
impl ProposalStore for SqlProposalStore {
    async fn insert_submission(&self, submission: NewSubmission) -> Result<(), StoreError> {
        let NewSubmission { proposal, steps, observations } = submission;
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        sqlx::query(
            "INSERT INTO proposal (id, public_id, name, workflow, client, requester,
                                   predecessor_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&proposal.id.0)
        .bind(&proposal.public_id.0)
        .bind(&proposal.name)
        .bind(proposal.workflow.as_str())
        .bind(proposal.client.as_ref().map(ClientTag::as_str))
        .bind(proposal.requester.as_str())
        .bind(proposal.predecessor_id.as_ref().map(|id| id.0.as_str()))
        .bind(proposal.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(duplicate_proposal(&proposal))?;

        for step in &steps {
            sqlx::query(
                "INSERT INTO approval_step (id, proposal_id, position, approver, status,
                                            access_token_digest, token_issued_at, responded_at,
                                            version, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&step.proposal_id.0)
            .bind(i64::from(step.position))
            .bind(step.approver.as_str())
            .bind(step.status.as_str())
            .bind(step.access_token_digest.as_deref())
            .bind(step.token_issued_at.map(|at| at.to_rfc3339()))
            .bind(step.responded_at.map(|at| at.to_rfc3339()))
            .bind(i64::from(step.version))
            .bind(step.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        }

        for observation in &observations {
            sqlx::query(
                "INSERT INTO observation (id, proposal_id, observer, notify_on_comment, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&observation.id.0)
            .bind(&observation.proposal_id.0)
            .bind(observation.observer.as_str())
            .bind(observation.notify_on_comment)
            .bind(observation.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PROPOSAL_COLUMNS} FROM proposal WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_proposal).transpose()?)
    }

    async fn list_proposals_by_public_id(
        &self,
        public_id: &PublicId,
    ) -> Result<Vec<Proposal>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposal WHERE public_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&public_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_proposal).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_step(&self, id: &ApprovalStepId) -> Result<Option<ApprovalStep>, StoreError> {
        let row = sqlx::query(&format!("SELECT {STEP_COLUMNS} FROM approval_step WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_step).transpose()?)
    }

    async fn list_steps(&self, proposal_id: &ProposalId) -> Result<Vec<ApprovalStep>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_step WHERE proposal_id = ? ORDER BY position ASC"
        ))
        .bind(&proposal_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?)
    }

    async fn resolve_step(
        &self,
        resolution: &StepResolution,
    ) -> Result<Vec<ApprovalStep>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let proposal_id: Option<String> = sqlx::query_scalar(
            "UPDATE approval_step
             SET status = ?, responded_at = ?, version = version + 1
             WHERE id = ? AND status = 'pending' AND version = ?
               AND NOT EXISTS (
                   SELECT 1 FROM rejection WHERE rejection.proposal_id = approval_step.proposal_id
               )
             RETURNING proposal_id",
        )
        .bind(resolution.status.as_str())
        .bind(resolution.responded_at.to_rfc3339())
        .bind(&resolution.step_id.0)
        .bind(i64::from(resolution.expected_version))
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let Some(proposal_id) = proposal_id else {
            tx.rollback().await.map_err(RepositoryError::from)?;
            tracing::debug!(
                event_name = "store.step_conflict",
                step_id = %resolution.step_id.0,
                expected_version = resolution.expected_version,
                "step transition lost the compare-and-set"
            );
            return Err(self.lost_race(&resolution.step_id, Some(resolution.expected_version))
                .await
                .into());
        };

        if let Some(rejection) = &resolution.rejection {
            sqlx::query(
                "INSERT INTO rejection (proposal_id, step_id, approver, comment, rejected_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&rejection.proposal_id.0)
            .bind(&rejection.step_id.0)
            .bind(rejection.approver.as_str())
            .bind(&rejection.comment)
            .bind(rejection.rejected_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        }

        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_step WHERE proposal_id = ? ORDER BY position ASC"
        ))
        .bind(&proposal_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;
        let committed = rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(committed)
    }

    async fn record_token(
        &self,
        step_id: &ApprovalStepId,
        digest: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE approval_step SET access_token_digest = ?, token_issued_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(digest)
        .bind(issued_at.to_rfc3339())
        .bind(&step_id.0)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if updated.rows_affected() == 0 {
            return Err(self.lost_race(step_id, None).await.into());
        }
        Ok(())
    }

    async fn list_observations(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Vec<Observation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, proposal_id, observer, notify_on_comment, created_at
             FROM observation WHERE proposal_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(&proposal_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_observation).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_rejection(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<Rejection>, StoreError> {
        let row = sqlx::query(
            "SELECT proposal_id, step_id, approver, comment, rejected_at
             FROM rejection WHERE proposal_id = ?",
        )
        .bind(&proposal_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_rejection).transpose()?)
    }

    async fn insert_comment(&self, comment: Comment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO comment (id, proposal_id, author, body, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&comment.id.0)
        .bind(&comment.proposal_id.0)
        .bind(comment.author.as_str())
        .bind(&comment.body)
        .bind(comment.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_comment(&self, id: &CommentId) -> Result<Option<Comment>, StoreError> {
        let row = sqlx::query(
            "SELECT id, proposal_id, author, body, created_at FROM comment WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_comment).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use approvey_core::domain::approval::{ApprovalStep, StepStatus};
    use approvey_core::domain::comment::Comment;
    use approvey_core::domain::observation::Observation;
    use approvey_core::domain::proposal::{
        ClientTag, Proposal, ProposalId, PublicId, UserId, WorkflowMode,
    };
    use approvey_core::{ApprovalChain, NewSubmission, ProposalStore, StoreError};

    use super::SqlProposalStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlProposalStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlProposalStore::new(pool)
    }

    fn submission(id: &str, approvers: &[&str]) -> NewSubmission {
        let now = Utc::now();
        let proposal_id = ProposalId(id.to_owned());
        let steps = approvers
            .iter()
            .enumerate()
            .map(|(index, approver)| {
                ApprovalStep::pending(
                    proposal_id.clone(),
                    index as u32 + 1,
                    UserId::new(approver),
                    now,
                )
            })
            .collect();

        NewSubmission {
            proposal: Proposal {
                id: proposal_id.clone(),
                public_id: PublicId("FY26-abcdef01".to_owned()),
                name: "toner cartridges".to_owned(),
                workflow: WorkflowMode::Linear,
                client: Some(ClientTag::ncr()),
                requester: UserId::new("requester@gsa.gov"),
                predecessor_id: None,
                created_at: now,
            },
            steps,
            observations: vec![Observation::new(
                proposal_id,
                UserId::new("watcher@gsa.gov"),
                true,
                now,
            )],
        }
    }

    async fn load_chain(store: &SqlProposalStore, proposal: &Proposal) -> ApprovalChain {
        let steps = store.list_steps(&proposal.id).await.expect("steps");
        ApprovalChain::new(proposal.id.clone(), proposal.workflow, steps)
    }

    #[tokio::test]
    async fn submission_round_trips_through_sqlite() {
        let store = setup().await;
        let submission = submission("P-1", &["b@gsa.gov", "a@gsa.gov"]);
        let expected = submission.proposal.clone();
        store.insert_submission(submission).await.expect("insert");

        let proposal = store.find_proposal(&expected.id).await.expect("find").expect("exists");
        assert_eq!(proposal.client, Some(ClientTag::ncr()));
        assert_eq!(proposal.workflow, WorkflowMode::Linear);

        let steps = store.list_steps(&expected.id).await.expect("steps");
        let approvers: Vec<&str> = steps.iter().map(|step| step.approver.as_str()).collect();
        assert_eq!(approvers, vec!["b@gsa.gov", "a@gsa.gov"]);
        assert!(steps.iter().all(|step| step.status == StepStatus::Pending && step.version == 1));

        let observations = store.list_observations(&expected.id).await.expect("observations");
        assert_eq!(observations.len(), 1);
        assert!(observations[0].notify_on_comment);
    }

    #[tokio::test]
    async fn duplicate_submission_is_a_conflict_and_leaves_no_partial_rows() {
        let store = setup().await;
        store.insert_submission(submission("P-1", &["a@gsa.gov"])).await.expect("first insert");

        let error = store
            .insert_submission(submission("P-1", &["x@gsa.gov", "y@gsa.gov"]))
            .await
            .expect_err("duplicate id");
        assert!(matches!(error, StoreError::Conflict { entity: "proposal", .. }));

        let steps = store.list_steps(&ProposalId("P-1".to_owned())).await.expect("steps");
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn resolve_step_is_compare_and_set() {
        let store = setup().await;
        let submission = submission("P-1", &["a@gsa.gov", "b@gsa.gov"]);
        let proposal = submission.proposal.clone();
        store.insert_submission(submission).await.expect("insert");

        let chain = load_chain(&store, &proposal).await;
        let resolution = chain.approve(&chain.steps()[0].id, Utc::now()).expect("approve");

        store.resolve_step(&resolution).await.expect("first write wins");
        let replay = store.resolve_step(&resolution).await.expect_err("stale version");
        assert!(matches!(replay, StoreError::Conflict { .. }));

        let step = store.find_step(&resolution.step_id).await.expect("find").expect("exists");
        assert_eq!(step.status, StepStatus::Approved);
        assert_eq!(step.version, 2);
        assert!(step.responded_at.is_some());
    }

    #[tokio::test]
    async fn resolving_an_unknown_step_reports_missing() {
        let store = setup().await;
        let submission = submission("P-1", &["a@gsa.gov"]);
        let proposal = submission.proposal.clone();
        store.insert_submission(submission).await.expect("insert");

        let chain = load_chain(&store, &proposal).await;
        let mut resolution = chain.approve(&chain.steps()[0].id, Utc::now()).expect("approve");
        resolution.step_id.0 = "APS-missing".to_owned();

        let error = store.resolve_step(&resolution).await.expect_err("missing step");
        assert!(matches!(error, StoreError::Missing { .. }));
    }

    #[tokio::test]
    async fn rejection_is_written_with_the_step_and_kept_once() {
        let store = setup().await;
        let submission = submission("P-1", &["a@gsa.gov", "b@gsa.gov"]);
        let proposal = submission.proposal.clone();
        store.insert_submission(submission).await.expect("insert");

        let chain = load_chain(&store, &proposal).await;
        let first = chain.reject(&chain.steps()[0].id, "over budget", Utc::now()).expect("reject");
        store.resolve_step(&first).await.expect("resolve");

        let rejection =
            store.find_rejection(&proposal.id).await.expect("rejection").expect("recorded");
        assert_eq!(rejection.comment, "over budget");
        assert_eq!(rejection.approver, UserId::new("a@gsa.gov"));

        let reloaded = load_chain(&store, &proposal).await;
        let refused = reloaded.reject(&reloaded.steps()[1].id, "me too", Utc::now());
        assert!(refused.is_err(), "a rejected chain accepts no further responses");
    }

    #[tokio::test]
    async fn stale_approval_after_a_committed_rejection_is_refused() {
        let store = setup().await;
        let mut submission = submission("P-1", &["a@gsa.gov", "b@gsa.gov"]);
        submission.proposal.workflow = WorkflowMode::Parallel;
        let proposal = submission.proposal.clone();
        store.insert_submission(submission).await.expect("insert");

        let stale = load_chain(&store, &proposal).await;
        let reject = stale.reject(&stale.steps()[0].id, "no", Utc::now()).expect("reject");
        let approve = stale.approve(&stale.steps()[1].id, Utc::now()).expect("approve");

        let committed = store.resolve_step(&reject).await.expect("rejection commits");
        let statuses: Vec<StepStatus> = committed.iter().map(|step| step.status).collect();
        assert_eq!(statuses, vec![StepStatus::Rejected, StepStatus::Pending]);

        let error = store.resolve_step(&approve).await.expect_err("late approval");
        assert_eq!(error, StoreError::ProposalRejected { id: "P-1".to_owned() });

        let step = store.find_step(&approve.step_id).await.expect("find").expect("exists");
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.version, 1);
    }

    #[tokio::test]
    async fn a_predecessor_accepts_one_successor() {
        let store = setup().await;
        store.insert_submission(submission("P-1", &["a@gsa.gov"])).await.expect("original");

        let successor = |id: &str| {
            let mut next = submission(id, &["a@gsa.gov"]);
            next.proposal.predecessor_id = Some(ProposalId("P-1".to_owned()));
            next
        };
        store.insert_submission(successor("P-2")).await.expect("first successor");
        let error = store.insert_submission(successor("P-3")).await.expect_err("fork");
        assert_eq!(error, StoreError::Superseded { id: "P-1".to_owned() });

        let orphan = store.list_steps(&ProposalId("P-3".to_owned())).await.expect("steps");
        assert!(orphan.is_empty());
    }

    #[tokio::test]
    async fn tokens_only_land_on_pending_steps_without_bumping_version() {
        let store = setup().await;
        let submission = submission("P-1", &["a@gsa.gov"]);
        let step_id = submission.steps[0].id.clone();
        let proposal = submission.proposal.clone();
        store.insert_submission(submission).await.expect("insert");

        store.record_token(&step_id, "sha256:one", Utc::now()).await.expect("token");
        let step = store.find_step(&step_id).await.expect("find").expect("exists");
        assert_eq!(step.access_token_digest.as_deref(), Some("sha256:one"));
        assert!(step.token_issued_at.is_some());
        assert_eq!(step.version, 1);

        let chain = load_chain(&store, &proposal).await;
        let resolution = chain.approve(&step_id, Utc::now()).expect("approve");
        store.resolve_step(&resolution).await.expect("resolve");

        let error = store.record_token(&step_id, "sha256:two", Utc::now()).await;
        assert!(matches!(error, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn comments_and_public_id_history_are_queryable() {
        let store = setup().await;
        store.insert_submission(submission("P-1", &["a@gsa.gov"])).await.expect("first");
        let mut second = submission("P-2", &["a@gsa.gov"]);
        second.proposal.predecessor_id = Some(ProposalId("P-1".to_owned()));
        second.proposal.created_at = second.proposal.created_at + chrono::Duration::seconds(5);
        store.insert_submission(second).await.expect("second");

        let history = store
            .list_proposals_by_public_id(&PublicId("FY26-abcdef01".to_owned()))
            .await
            .expect("history");
        let ids: Vec<&str> = history.iter().map(|proposal| proposal.id.0.as_str()).collect();
        assert_eq!(ids, vec!["P-1", "P-2"]);
        assert_eq!(history[1].predecessor_id, Some(ProposalId("P-1".to_owned())));

        let comment = Comment::new(
            ProposalId("P-2".to_owned()),
            UserId::new("a@gsa.gov"),
            "Need a quote",
            Utc::now(),
        );
        store.insert_comment(comment.clone()).await.expect("comment");
        assert_eq!(store.find_comment(&comment.id).await.expect("find"), Some(comment));
    }
}
