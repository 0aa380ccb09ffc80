//! REST API routes.
//!
//! Handlers decode and check the request, run the matching service call
//! under the request's cancellation token and deadline, and map the result
//! or error kind onto an HTTP response.

use crate::error::AppError;
use crate::models::{PullRequest, PullRequestShort, TeamWithMembers, User};
use crate::services::server::AppState;
use crate::services::{DeactivationResult, NewMember, PrStats, ReassignOutcome, ReviewerStat};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

// ── Error handling ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error response for a handler.
enum ApiErr {
    /// Failure reported by a service.
    App(AppError),
    /// Body or query could not be decoded, or a required field is blank.
    BadRequest(String),
}

impl ApiErr {
    fn status(&self) -> StatusCode {
        match self {
            ApiErr::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErr::App(err) => match err {
                AppError::TeamExists | AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
                AppError::PrExists
                | AppError::PrMerged
                | AppError::NotAssigned
                | AppError::NoCandidate => StatusCode::CONFLICT,
                AppError::NotFound { .. } => StatusCode::NOT_FOUND,
                AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match self {
            ApiErr::BadRequest(message) => ("INVALID_REQUEST", message),
            ApiErr::App(err) if err.is_internal() => {
                log::error!("[api] Internal error: {}", err);
                (err.code(), "internal server error".to_string())
            }
            ApiErr::App(err) => (err.code(), err.to_string()),
        };
        (
            status,
            Json(ErrorBody {
                error: ErrorDetail {
                    code: code.to_string(),
                    message,
                },
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl From<JsonRejection> for ApiErr {
    fn from(rejection: JsonRejection) -> Self {
        log::debug!("[api] Rejected body: {}", rejection.body_text());
        Self::BadRequest("invalid JSON format".to_string())
    }
}

impl From<QueryRejection> for ApiErr {
    fn from(rejection: QueryRejection) -> Self {
        log::debug!("[api] Rejected query: {}", rejection.body_text());
        Self::BadRequest("invalid query string".to_string())
    }
}

/// Blank or missing required fields fail before any service call.
fn require(field: &str, value: &str) -> Result<(), ApiErr> {
    if value.trim().is_empty() {
        return Err(ApiErr::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

// ── Request types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateTeamRequest {
    #[serde(default)]
    team_name: String,
    #[serde(default)]
    members: Vec<NewMember>,
}

#[derive(Deserialize)]
struct TeamQuery {
    #[serde(default)]
    team_name: String,
}

#[derive(Deserialize)]
struct DeactivateUsersRequest {
    #[serde(default)]
    team_name: String,
    #[serde(default)]
    user_ids: Vec<String>,
}

#[derive(Deserialize)]
struct SetActiveRequest {
    #[serde(default)]
    user_id: String,
    is_active: bool,
}

#[derive(Deserialize)]
struct UserQuery {
    #[serde(default)]
    user_id: String,
}

#[derive(Deserialize)]
struct CreatePrRequest {
    #[serde(default)]
    pull_request_id: String,
    #[serde(default)]
    pull_request_name: String,
    #[serde(default)]
    author_id: String,
}

#[derive(Deserialize)]
struct MergePrRequest {
    #[serde(default)]
    pull_request_id: String,
}

#[derive(Deserialize)]
struct ReassignRequest {
    #[serde(default)]
    pull_request_id: String,
    #[serde(default)]
    old_user_id: String,
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TeamResponse {
    team: TeamWithMembers,
}

#[derive(Serialize)]
struct UserResponse {
    user: User,
}

#[derive(Serialize)]
struct UserReviewsResponse {
    user_id: String,
    pull_requests: Vec<PullRequestShort>,
}

#[derive(Serialize)]
struct PrResponse {
    pr: PullRequest,
}

#[derive(Serialize)]
struct ReviewerStatsResponse {
    reviewers: Vec<ReviewerStat>,
}

// ── Route builders ───────────────────────────────────────────────────────────

pub fn team_routes() -> Router<AppState> {
    Router::new()
        .route("/team/add", post(create_team))
        .route("/team/get", get(get_team))
        .route("/team/deactivateUsers", post(deactivate_users))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_reviews))
}

pub fn pull_request_routes() -> Router<AppState> {
    Router::new()
        .route("/pullRequest/create", post(create_pr))
        .route("/pullRequest/merge", post(merge_pr))
        .route("/pullRequest/reassign", post(reassign_reviewer))
}

pub fn stats_routes() -> Router<AppState> {
    Router::new()
        .route("/stats/reviewers", get(reviewer_stats))
        .route("/stats/pullRequests", get(pr_stats))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /team/add: create a team with its members.
async fn create_team(
    State(state): State<AppState>,
    body: Result<Json<CreateTeamRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TeamResponse>), ApiErr> {
    let Json(req) = body?;
    require("team_name", &req.team_name)?;
    for member in &req.members {
        require("user_id", &member.user_id)?;
        require("username", &member.username)?;
    }

    let cancel = state.request_token();
    let team = state
        .within_deadline(
            &cancel,
            state.teams.create_team(&req.team_name, &req.members, &cancel),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(TeamResponse { team })))
}

/// GET /team/get?team_name=X: team with members.
async fn get_team(
    State(state): State<AppState>,
    query: Result<Query<TeamQuery>, QueryRejection>,
) -> Result<Json<TeamWithMembers>, ApiErr> {
    let Query(params) = query?;
    require("team_name", &params.team_name)?;

    let cancel = state.request_token();
    let team = state
        .within_deadline(&cancel, state.teams.get_team(&params.team_name, &cancel))
        .await?;
    Ok(Json(team))
}

/// POST /team/deactivateUsers: bulk deactivation with reviewer repair.
async fn deactivate_users(
    State(state): State<AppState>,
    body: Result<Json<DeactivateUsersRequest>, JsonRejection>,
) -> Result<Json<DeactivationResult>, ApiErr> {
    let Json(req) = body?;
    require("team_name", &req.team_name)?;

    let cancel = state.request_token();
    let result = state
        .within_deadline(
            &cancel,
            state
                .engine
                .deactivate_team_users(&req.team_name, &req.user_ids, &cancel),
        )
        .await?;
    Ok(Json(result))
}

/// POST /users/setIsActive: toggle one user.
async fn set_is_active(
    State(state): State<AppState>,
    body: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiErr> {
    let Json(req) = body?;
    require("user_id", &req.user_id)?;

    let cancel = state.request_token();
    let user = state
        .within_deadline(
            &cancel,
            state.users.set_user_active(&req.user_id, req.is_active, &cancel),
        )
        .await?;
    Ok(Json(UserResponse { user }))
}

/// GET /users/getReview?user_id=X: pull requests the user reviews.
async fn get_reviews(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<UserReviewsResponse>, ApiErr> {
    let Query(params) = query?;
    require("user_id", &params.user_id)?;

    let cancel = state.request_token();
    let pull_requests = state
        .within_deadline(&cancel, state.users.get_user_reviews(&params.user_id, &cancel))
        .await?;
    Ok(Json(UserReviewsResponse {
        user_id: params.user_id,
        pull_requests,
    }))
}

/// POST /pullRequest/create: create with auto-assigned reviewers.
async fn create_pr(
    State(state): State<AppState>,
    body: Result<Json<CreatePrRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PrResponse>), ApiErr> {
    let Json(req) = body?;
    require("pull_request_id", &req.pull_request_id)?;
    require("pull_request_name", &req.pull_request_name)?;
    require("author_id", &req.author_id)?;

    let cancel = state.request_token();
    let pr = state
        .within_deadline(
            &cancel,
            state.engine.create_pr(
                &req.pull_request_id,
                &req.pull_request_name,
                &req.author_id,
                &cancel,
            ),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(PrResponse { pr })))
}

/// POST /pullRequest/merge: idempotent merge.
async fn merge_pr(
    State(state): State<AppState>,
    body: Result<Json<MergePrRequest>, JsonRejection>,
) -> Result<Json<PrResponse>, ApiErr> {
    let Json(req) = body?;
    require("pull_request_id", &req.pull_request_id)?;

    let cancel = state.request_token();
    let pr = state
        .within_deadline(&cancel, state.engine.merge_pr(&req.pull_request_id, &cancel))
        .await?;
    Ok(Json(PrResponse { pr }))
}

/// POST /pullRequest/reassign: swap one reviewer.
async fn reassign_reviewer(
    State(state): State<AppState>,
    body: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<Json<ReassignOutcome>, ApiErr> {
    let Json(req) = body?;
    require("pull_request_id", &req.pull_request_id)?;
    require("old_user_id", &req.old_user_id)?;

    let cancel = state.request_token();
    let outcome = state
        .within_deadline(
            &cancel,
            state
                .engine
                .reassign_reviewer(&req.pull_request_id, &req.old_user_id, &cancel),
        )
        .await?;
    Ok(Json(outcome))
}

/// GET /stats/reviewers: assignment counts, highest first.
async fn reviewer_stats(
    State(state): State<AppState>,
) -> Result<Json<ReviewerStatsResponse>, ApiErr> {
    let cancel = state.request_token();
    let reviewers = state
        .within_deadline(&cancel, state.stats.reviewer_stats(&cancel))
        .await?;
    Ok(Json(ReviewerStatsResponse { reviewers }))
}

/// GET /stats/pullRequests: open and merged counts.
async fn pr_stats(State(state): State<AppState>) -> Result<Json<PrStats>, ApiErr> {
    let cancel = state.request_token();
    let stats = state
        .within_deadline(&cancel, state.stats.pr_stats(&cancel))
        .await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        ApiErr::from(err).status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(AppError::TeamExists), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(AppError::PrExists), StatusCode::CONFLICT);
        assert_eq!(status_of(AppError::PrMerged), StatusCode::CONFLICT);
        assert_eq!(status_of(AppError::NotAssigned), StatusCode::CONFLICT);
        assert_eq!(status_of(AppError::NoCandidate), StatusCode::CONFLICT);
        assert_eq!(status_of(AppError::pr_not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(AppError::invalid_input("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::Cancelled),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::internal("disk on fire")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_require_rejects_blank() {
        assert!(require("team_name", "backend").is_ok());
        let err = require("team_name", "  ").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
