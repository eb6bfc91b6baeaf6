//! Submission API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CreateSubmissionRequest, ListSubmissionsQuery, Submission, SubmissionWithUser,
};
use crate::AppState;

/// Default page size for the recent-submissions listing.
const DEFAULT_LIST_LIMIT: i64 = 50;
/// Hard cap on the listing page size.
const MAX_LIST_LIMIT: i64 = 200;

/// POST /submissions - Append a submission. Anonymous submissions allowed.
pub async fn create_submission(
    State(state): State<AppState>,
    Json(request): Json<CreateSubmissionRequest>,
) -> ApiResult<Submission> {
    let submission = state
        .repo
        .insert_submission(&request.payload, request.user_subject.as_deref())
        .await?;
    success(submission)
}

/// GET /submissions - List recent submissions, newest first.
pub async fn list_submissions(
    State(state): State<AppState>,
    Query(query): Query<ListSubmissionsQuery>,
) -> ApiResult<Vec<Submission>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let submissions = state.repo.list_recent_submissions(limit).await?;
    success(submissions)
}

/// GET /submissions/:id - Get a submission with linked user info attached.
pub async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SubmissionWithUser> {
    match state.repo.get_submission_with_user(&id).await? {
        Some(submission) => success(submission),
        None => Err(AppError::NotFound(format!("Submission {} not found", id))),
    }
}
