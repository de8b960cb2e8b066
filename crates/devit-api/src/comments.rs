use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use devit_types::api::{
    CommentResponse, CreateCommentRequest, ReactableResponse, VoteRequest, VoteResponse,
};
use devit_types::models::ReactableKind;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::run_blocking;
use crate::state::AppState;
use crate::views::{comment_response, vote_response};

/// Comments of a post, newest first. An unknown post yields an empty list.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Vec<CommentResponse>>, ApiError> {
    let comments = run_blocking(move || state.content.list_comments(post_id)).await?;
    Ok(Json(comments.iter().map(comment_response).collect()))
}

/// Requires a bearer token. The comment's author is the token's user; a body
/// carrying `username` or `user_id` is rejected as an unknown field.
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::InvalidArgument("Comment text cannot be empty".into()));
    }
    let comment = run_blocking(move || state.content.create_comment(&user, req)).await?;
    Ok((StatusCode::CREATED, Json(comment_response(&comment))))
}

pub async fn vote_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteResponse<ReactableResponse>>, ApiError> {
    let outcome = run_blocking(move || {
        state
            .votes
            .apply_vote(ReactableKind::Comment, comment_id, user.id, &req.vote_type)
    })
    .await?;
    Ok(Json(vote_response(&outcome)))
}
