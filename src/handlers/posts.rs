use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

use crate::{
    AppState,
    error::Result,
    models::{TargetType, ToggleResponse, VoteRequest, VoteResponse},
};

pub async fn vote_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<VoteResponse>> {
    let response = state
        .engine
        .submit_vote(post_id, TargetType::Post, payload.vote_type)
        .await?;

    Ok(Json(response))
}

pub async fn save_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<ToggleResponse>> {
    let response = state.engine.toggle_save(post_id, TargetType::Post).await?;
    Ok(Json(response))
}

pub async fn hide_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<ToggleResponse>> {
    let response = state.engine.toggle_hide(post_id).await?;
    Ok(Json(response))
}
