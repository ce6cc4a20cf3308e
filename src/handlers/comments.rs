use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    AppState,
    error::Result,
    models::{
        Comment, CommentSort, CommentThread, CreateCommentRequest, TargetType, ToggleResponse,
        VoteRequest, VoteResponse,
    },
};

#[derive(Debug, Deserialize)]
pub struct GetCommentsQuery {
    pub sort: Option<CommentSort>,
    pub refresh: Option<bool>,
}

pub async fn get_post_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Query(query): Query<GetCommentsQuery>,
) -> Result<Json<Vec<CommentThread>>> {
    if query.refresh.unwrap_or(false) {
        state.engine.invalidate_comments(post_id).await;
    }

    let threads = state
        .engine
        .get_comment_forest(post_id, query.sort.unwrap_or_default())
        .await?;

    Ok(Json(threads))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<Json<Comment>> {
    let comment = state.engine.create_comment(payload).await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.engine.delete_comment(comment_id).await?;

    Ok(Json(json!({
        "message": "Comment deleted successfully"
    })))
}

pub async fn vote_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<VoteResponse>> {
    let response = state
        .engine
        .submit_vote(comment_id, TargetType::Comment, payload.vote_type)
        .await?;

    Ok(Json(response))
}

pub async fn save_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
) -> Result<Json<ToggleResponse>> {
    let response = state
        .engine
        .toggle_save(comment_id, TargetType::Comment)
        .await?;

    Ok(Json(response))
}
