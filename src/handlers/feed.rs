use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    error::{AppError, Result},
    models::{DisplayScore, FeedCursor, FeedPage, PostSort, TimeRange},
    services::mutation_service::FailureNotice,
};

#[derive(Debug, Deserialize)]
pub struct UpdateFeedRequest {
    pub sort: Option<PostSort>,
    pub t: Option<TimeRange>,
}

pub async fn next_page(State(state): State<AppState>) -> Result<Json<FeedPage>> {
    let page = state.engine.next_page().await?;
    Ok(Json(page))
}

pub async fn update_feed(
    State(state): State<AppState>,
    Json(payload): Json<UpdateFeedRequest>,
) -> Result<Json<FeedCursor>> {
    if let Some(sort) = payload.sort {
        state.engine.set_sort(sort).await;
    }
    if let Some(time_window) = payload.t {
        state.engine.set_time_window(time_window).await;
    }

    Ok(Json(state.engine.feed_cursor().await))
}

pub async fn reset_feed(State(state): State<AppState>) -> Result<Json<FeedCursor>> {
    state.engine.reset_feed().await;
    Ok(Json(state.engine.feed_cursor().await))
}

pub async fn get_score(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
) -> Result<Json<DisplayScore>> {
    let score = state
        .engine
        .get_display_score(target_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("{} is not loaded", target_id)))?;

    Ok(Json(score))
}

pub async fn take_notices(State(state): State<AppState>) -> Json<Vec<FailureNotice>> {
    Json(state.engine.take_notices().await)
}
