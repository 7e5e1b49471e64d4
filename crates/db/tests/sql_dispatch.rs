use std::sync::Arc;

use approvey_core::audit::InMemoryAuditSink;
use approvey_core::{
    ApplicationError, ApprovalStepId, Dispatcher, DomainError, LinkAction, LinkOutcome,
    LinkResponse, NcrMailboxes, PolicySelector, PolicySettings, ProposalStatus, ProposalStore,
    RecordingNotificationPort, StepStatus, SubmissionRequest, SubmissionService, TemplateKind,
    UserId,
};
use approvey_db::{connect_with_settings, migrations, SqlProposalStore};
use tempfile::TempDir;

struct SqlHarness {
    _dir: TempDir,
    service: SubmissionService,
    dispatcher: Arc<Dispatcher>,
    store: SqlProposalStore,
    notifier: RecordingNotificationPort,
}

async fn harness() -> SqlHarness {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("approvey.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");

    let store = SqlProposalStore::new(pool);
    let notifier = RecordingNotificationPort::default();
    let audit = InMemoryAuditSink::default();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(PolicySelector::new(PolicySettings::default())),
        Arc::new(store.clone()),
        Arc::new(notifier.clone()),
        Arc::new(audit.clone()),
    ));
    let service = SubmissionService::new(
        dispatcher.clone(),
        Arc::new(audit),
        NcrMailboxes {
            ba80: UserId::new("ba80-budget@ncr.gov"),
            ba61_tier1: UserId::new("tier1-budget@ncr.gov"),
            ba61_tier2: UserId::new("tier2-budget@ncr.gov"),
        },
    );

    SqlHarness { _dir: dir, service, dispatcher, store, notifier }
}

fn request(workflow: &str, approvers: &[&str]) -> SubmissionRequest {
    SubmissionRequest {
        name: "Standing desks".to_string(),
        requester: UserId::new("requester@gsa.gov"),
        workflow: workflow.to_string(),
        client: None,
        approvers: approvers.iter().map(UserId::new).collect(),
        observers: Vec::new(),
        expense_type: None,
        emergency: false,
        public_id: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_responders_on_one_step_persist_a_single_transition() {
    let harness = harness().await;
    let outcome = harness
        .service
        .submit(request("linear", &["a@gsa.gov", "b@gsa.gov"]))
        .await
        .expect("submit");
    let steps = harness.store.list_steps(&outcome.proposal.id).await.expect("steps");

    let spawn_approval = |step_id: ApprovalStepId| {
        let dispatcher = harness.dispatcher.clone();
        tokio::spawn(async move { dispatcher.on_approval_approved(&step_id).await })
    };
    let first = spawn_approval(steps[0].id.clone());
    let second = spawn_approval(steps[0].id.clone());
    let (first, second) = tokio::join!(first, second);
    let results = [first.expect("join"), second.expect("join")];

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().any(|result| matches!(
        result,
        Err(ApplicationError::Domain(DomainError::StepAlreadyResolved { .. }))
    )));

    let step = harness.store.find_step(&steps[0].id).await.expect("find").expect("step");
    assert_eq!(step.status, StepStatus::Approved);
    assert_eq!(step.version, 2);
    assert_eq!(harness.notifier.sent_to("b@gsa.gov", TemplateKind::ApprovalRequested).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_rejection_keeps_late_approvals_out_of_sqlite() {
    for _ in 0..8 {
        let harness = harness().await;
        let outcome = harness
            .service
            .submit(request("parallel", &["a@gsa.gov", "b@gsa.gov"]))
            .await
            .expect("submit");
        let proposal_id = outcome.proposal.id.clone();
        let steps = harness.store.list_steps(&proposal_id).await.expect("steps");

        let reject = {
            let dispatcher = harness.dispatcher.clone();
            let (proposal_id, step_id) = (proposal_id.clone(), steps[0].id.clone());
            tokio::spawn(async move {
                dispatcher.on_proposal_rejected(&proposal_id, &step_id, "Not on schedule").await
            })
        };
        let approve = {
            let dispatcher = harness.dispatcher.clone();
            let step_id = steps[1].id.clone();
            tokio::spawn(async move { dispatcher.on_approval_approved(&step_id).await })
        };
        let (reject, approve) = tokio::join!(reject, approve);

        let rejected = reject.expect("join").expect("rejection commits");
        assert_eq!(rejected.status, ProposalStatus::Rejected);

        let b = harness.store.find_step(&steps[1].id).await.expect("find").expect("step");
        match approve.expect("join") {
            Ok(report) => {
                assert_eq!(report.status, ProposalStatus::Pending);
                assert_eq!(b.status, StepStatus::Approved);
            }
            Err(error) => {
                assert!(matches!(
                    error,
                    ApplicationError::Domain(DomainError::ProposalAlreadyRejected { .. })
                ));
                assert_eq!((b.status, b.version), (StepStatus::Pending, 1));
            }
        }

        let rejection =
            harness.store.find_rejection(&proposal_id).await.expect("rejection").expect("row");
        assert_eq!(rejection.step_id, steps[0].id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_rejections_persist_exactly_one() {
    for _ in 0..8 {
        let harness = harness().await;
        let outcome = harness
            .service
            .submit(request("parallel", &["a@gsa.gov", "b@gsa.gov"]))
            .await
            .expect("submit");
        let proposal_id = outcome.proposal.id.clone();
        let steps = harness.store.list_steps(&proposal_id).await.expect("steps");

        let spawn_rejection = |step_id: ApprovalStepId, comment: &'static str| {
            let dispatcher = harness.dispatcher.clone();
            let proposal_id = proposal_id.clone();
            tokio::spawn(async move {
                dispatcher.on_proposal_rejected(&proposal_id, &step_id, comment).await
            })
        };
        let (first, second) = tokio::join!(
            spawn_rejection(steps[0].id.clone(), "first"),
            spawn_rejection(steps[1].id.clone(), "second"),
        );
        let results = [first.expect("join"), second.expect("join")];

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        let rejected: Vec<_> = harness
            .store
            .list_steps(&proposal_id)
            .await
            .expect("steps")
            .into_iter()
            .filter(|step| step.status == StepStatus::Rejected)
            .collect();
        assert_eq!(rejected.len(), 1);

        let rejection =
            harness.store.find_rejection(&proposal_id).await.expect("rejection").expect("row");
        assert_eq!(rejection.step_id, rejected[0].id);
        assert_eq!(
            harness.notifier.sent_to("requester@gsa.gov", TemplateKind::ProposalRejected).len(),
            1
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_final_approvals_over_sqlite_report_one_transition() {
    for _ in 0..8 {
        let harness = harness().await;
        let outcome = harness
            .service
            .submit(request("parallel", &["a@gsa.gov", "b@gsa.gov"]))
            .await
            .expect("submit");
        let steps = harness.store.list_steps(&outcome.proposal.id).await.expect("steps");

        let spawn_approval = |step_id: ApprovalStepId| {
            let dispatcher = harness.dispatcher.clone();
            tokio::spawn(async move { dispatcher.on_approval_approved(&step_id).await })
        };
        let (first, second) =
            tokio::join!(spawn_approval(steps[0].id.clone()), spawn_approval(steps[1].id.clone()));
        let reports = [first.expect("join").expect("a"), second.expect("join").expect("b")];

        let changed: Vec<_> = reports.iter().filter(|report| report.status_changed).collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].status, ProposalStatus::Approved);
        assert!(reports.iter().any(|report| report.status == ProposalStatus::Pending));
    }
}

#[tokio::test]
async fn parallel_chain_over_sqlite_approves_once_all_steps_respond() {
    let harness = harness().await;
    let outcome = harness
        .service
        .submit(request("parallel", &["a@gsa.gov", "b@gsa.gov"]))
        .await
        .expect("submit");
    let steps = harness.store.list_steps(&outcome.proposal.id).await.expect("steps");

    let partial = harness.dispatcher.on_approval_approved(&steps[1].id).await.expect("b");
    assert_eq!(partial.status, ProposalStatus::Pending);
    assert!(!partial.status_changed);

    let last = harness.dispatcher.on_approval_approved(&steps[0].id).await.expect("a");
    assert_eq!(last.status, ProposalStatus::Approved);
    assert!(last.status_changed);
}

#[tokio::test]
async fn link_tokens_are_verified_against_stored_digests() {
    let harness = harness().await;
    let outcome =
        harness.service.submit(request("linear", &["a@gsa.gov"])).await.expect("submit");
    let token = harness
        .notifier
        .sent_to("a@gsa.gov", TemplateKind::ApprovalRequested)
        .last()
        .and_then(|sent| sent.payload.access_token.clone())
        .expect("token issued");

    let step = &harness.store.list_steps(&outcome.proposal.id).await.expect("steps")[0];
    let digest = step.access_token_digest.clone().expect("digest stored");
    assert!(digest.starts_with("sha256:"));
    assert!(!digest.contains(&token));

    let link = |token: String| LinkResponse {
        proposal_id: outcome.proposal.id.clone(),
        user: UserId::new("a@gsa.gov"),
        token: token.into(),
        action: LinkAction::Reject,
        comment: Some("wrong vendor".to_string()),
    };

    let forged = harness.dispatcher.respond_via_link(link("forged".to_string())).await;
    assert!(matches!(forged, Ok(LinkOutcome::Unauthorized)));

    let accepted = harness.dispatcher.respond_via_link(link(token.clone())).await;
    assert!(matches!(accepted, Ok(LinkOutcome::Completed(ref report))
        if report.status == ProposalStatus::Rejected));

    let replay = harness.dispatcher.respond_via_link(link(token)).await;
    assert!(matches!(replay, Ok(LinkOutcome::AlreadyResolved)));

    let rejection = harness
        .store
        .find_rejection(&outcome.proposal.id)
        .await
        .expect("rejection")
        .expect("recorded");
    assert_eq!(rejection.comment, "wrong vendor");
}
