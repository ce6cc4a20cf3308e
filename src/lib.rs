pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod redis;
pub mod services;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{ACCEPT, CONTENT_TYPE},
    },
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Config, services::engine::Engine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .allowed_origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid allowed origin {:?}", origin);
                        None
                    }
                })
                .collect::<Vec<_>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    let feed_routes = Router::new()
        .route("/api/feed", get(handlers::feed::next_page))
        .route("/api/feed/sort", put(handlers::feed::update_feed))
        .route("/api/feed/reset", post(handlers::feed::reset_feed))
        .route("/api/votables/{target_id}/score", get(handlers::feed::get_score))
        .route("/api/notices", get(handlers::feed::take_notices));

    let post_routes = Router::new()
        .route(
            "/api/posts/{post_id}/vote",
            post(handlers::posts::vote_post),
        )
        .route(
            "/api/posts/{post_id}/save",
            post(handlers::posts::save_post),
        )
        .route(
            "/api/posts/{post_id}/hide",
            post(handlers::posts::hide_post),
        )
        .route(
            "/api/posts/{post_id}/comments",
            get(handlers::comments::get_post_comments),
        );

    let comment_routes = Router::new()
        .route("/api/comments", post(handlers::comments::create_comment))
        .route(
            "/api/comments/{comment_id}",
            delete(handlers::comments::delete_comment),
        )
        .route(
            "/api/comments/{comment_id}/vote",
            post(handlers::comments::vote_comment),
        )
        .route(
            "/api/comments/{comment_id}/save",
            post(handlers::comments::save_comment),
        );

    Router::new()
        .merge(feed_routes)
        .merge(post_routes)
        .merge(comment_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
