//! HTTP surface for the dispatch core.
//!
//! JSON API Endpoints:
//! - `POST /api/v1/proposals`                    submit a proposal
//! - `POST /api/v1/proposals/{id}/resubmit`      resubmit after rejection
//! - `POST /api/v1/proposals/{id}/comments`      add a comment
//! - `POST /api/v1/proposals/{id}/update`        announce a proposal update
//! - `POST /api/v1/approvals/{step_id}/approve`  approve a step
//! - `POST /api/v1/approvals/{step_id}/reject`   reject a step
//! - `POST /api/v1/approvals/{step_id}/remind`   re-request an approver's action
//!
//! One-click link:
//! - `GET  /approval_response?cart_id&user_id&cch&approver_action`

use std::sync::Arc;

use approvey_core::domain::comment::Comment;
use approvey_core::{
    ApplicationError, ApprovalStepId, DispatchReport, InterfaceError, LinkAction, LinkOutcome,
    LinkResponse, Proposal, ProposalId, ProposalStatus, SubmissionRequest, SubmissionService,
    UserId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct RoutesState {
    submissions: Arc<SubmissionService>,
}

impl RoutesState {
    pub fn new(submissions: Arc<SubmissionService>) -> Self {
        Self { submissions }
    }
}

pub fn router(state: RoutesState) -> Router {
    Router::new()
        .route("/api/v1/proposals", post(submit_proposal))
        .route("/api/v1/proposals/{id}/resubmit", post(resubmit_proposal))
        .route("/api/v1/proposals/{id}/comments", post(add_comment))
        .route("/api/v1/proposals/{id}/update", post(announce_update))
        .route("/api/v1/approvals/{step_id}/approve", post(approve_step))
        .route("/api/v1/approvals/{step_id}/reject", post(reject_step))
        .route("/api/v1/approvals/{step_id}/remind", post(remind_approver))
        .route("/approval_response", get(approval_response))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub author: String,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    pub cart_id: String,
    pub user_id: String,
    pub cch: String,
    pub approver_action: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeliverySummary {
    pub recipient: String,
    pub template: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DispatchSummary {
    pub correlation_id: String,
    pub proposal_id: String,
    pub kind: String,
    pub status: ProposalStatus,
    pub status_changed: bool,
    pub deliveries: Vec<DeliverySummary>,
}

impl From<&DispatchReport> for DispatchSummary {
    fn from(report: &DispatchReport) -> Self {
        Self {
            correlation_id: report.correlation_id.clone(),
            proposal_id: report.proposal_id.0.clone(),
            kind: report.kind.to_string(),
            status: report.status,
            status_changed: report.status_changed,
            deliveries: report
                .deliveries
                .iter()
                .map(|record| DeliverySummary {
                    recipient: record.recipient.to_string(),
                    template: record.template.as_str(),
                    step_id: record.step_id.as_ref().map(|id| id.0.clone()),
                    delivered: record.delivered(),
                    error: record.outcome.as_ref().err().map(ToString::to_string),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProposalResponse {
    pub proposal: Proposal,
    pub dispatch: DispatchSummary,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub comment: Comment,
    pub dispatch: DispatchSummary,
}

#[derive(Debug, Serialize)]
pub struct LinkReply {
    pub outcome: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchSummary>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

/// An [`InterfaceError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let correlation_id = format!("http-{}", Uuid::new_v4().simple());
        if error.is_recoverable() {
            warn!(
                event_name = "http.request_refused",
                correlation_id = %correlation_id,
                error = %error,
                "request refused"
            );
        } else {
            error!(
                event_name = "http.request_failed",
                correlation_id = %correlation_id,
                error = %error,
                "request failed"
            );
        }
        Self(error.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ErrorBody {
            error: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// Proposal handlers
// ---------------------------------------------------------------------------

async fn submit_proposal(
    State(state): State<RoutesState>,
    Json(request): Json<SubmissionRequest>,
) -> Result<(StatusCode, Json<ProposalResponse>), ApiError> {
    let outcome = state.submissions.submit(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProposalResponse {
            dispatch: DispatchSummary::from(&outcome.report),
            proposal: outcome.proposal,
        }),
    ))
}

async fn resubmit_proposal(
    Path(id): Path<String>,
    State(state): State<RoutesState>,
    Json(request): Json<SubmissionRequest>,
) -> Result<(StatusCode, Json<ProposalResponse>), ApiError> {
    let outcome = state.submissions.resubmit(&ProposalId(id), request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProposalResponse {
            dispatch: DispatchSummary::from(&outcome.report),
            proposal: outcome.proposal,
        }),
    ))
}

async fn add_comment(
    Path(id): Path<String>,
    State(state): State<RoutesState>,
    Json(request): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>), ApiError> {
    let outcome = state
        .submissions
        .add_comment(&ProposalId(id), UserId::new(&request.author), &request.body)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            dispatch: DispatchSummary::from(&outcome.report),
            comment: outcome.comment,
        }),
    ))
}

async fn announce_update(
    Path(id): Path<String>,
    State(state): State<RoutesState>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let report = state.submissions.dispatcher().on_proposal_update(&ProposalId(id)).await?;
    Ok(Json(DispatchSummary::from(&report)))
}

// ---------------------------------------------------------------------------
// Approval handlers
// ---------------------------------------------------------------------------

async fn approve_step(
    Path(step_id): Path<String>,
    State(state): State<RoutesState>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let report =
        state.submissions.dispatcher().on_approval_approved(&ApprovalStepId(step_id)).await?;
    Ok(Json(DispatchSummary::from(&report)))
}

async fn reject_step(
    Path(step_id): Path<String>,
    State(state): State<RoutesState>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let dispatcher = state.submissions.dispatcher();
    let step_id = ApprovalStepId(step_id);
    let step = dispatcher
        .store()
        .find_step(&step_id)
        .await
        .map_err(ApplicationError::from)?
        .ok_or_else(|| ApplicationError::not_found("approval step", step_id.0.clone()))?;

    let comment = request.comment.unwrap_or_default();
    let report = dispatcher.on_proposal_rejected(&step.proposal_id, &step_id, &comment).await?;
    Ok(Json(DispatchSummary::from(&report)))
}

async fn remind_approver(
    Path(step_id): Path<String>,
    State(state): State<RoutesState>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let report =
        state.submissions.dispatcher().request_approver_action(&ApprovalStepId(step_id)).await?;
    Ok(Json(DispatchSummary::from(&report)))
}

async fn approval_response(
    State(state): State<RoutesState>,
    Query(query): Query<LinkQuery>,
) -> Result<(StatusCode, Json<LinkReply>), ApiError> {
    let action = query.approver_action.parse::<LinkAction>().map_err(ApplicationError::from)?;
    let response = LinkResponse {
        proposal_id: ProposalId(query.cart_id),
        user: UserId::new(&query.user_id),
        token: query.cch.into(),
        action,
        comment: query.comment,
    };

    let outcome = state.submissions.dispatcher().respond_via_link(response).await?;
    let reply = match outcome {
        LinkOutcome::Completed(report) => {
            info!(
                event_name = "http.approval_response.completed",
                correlation_id = %report.correlation_id,
                proposal_id = %report.proposal_id.0,
                "one-click response recorded"
            );
            (
                StatusCode::OK,
                LinkReply {
                    outcome: "completed",
                    message: "Thanks, your response has been recorded.",
                    dispatch: Some(DispatchSummary::from(&report)),
                },
            )
        }
        LinkOutcome::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            LinkReply {
                outcome: "unauthorized",
                message: "This approval link is not valid for your account.",
                dispatch: None,
            },
        ),
        LinkOutcome::AlreadyResolved => (
            StatusCode::CONFLICT,
            LinkReply {
                outcome: "already_resolved",
                message: "This approval has already been responded to.",
                dispatch: None,
            },
        ),
    };

    Ok((reply.0, Json(reply.1)))
}
