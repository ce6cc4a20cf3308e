use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid vote value: {0}")]
    InvalidVoteValue(i16),

    #[error("Maximum comment depth of {0} exceeded")]
    MaxDepthExceeded(i32),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Duplicate mutation rejected")]
    DuplicateMutationRejected,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, retryable) = match self {
            AppError::InvalidVoteValue(_) => (StatusCode::BAD_REQUEST, self.to_string(), false),
            AppError::MaxDepthExceeded(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string(), false)
            }
            AppError::PersistenceFailure(ref message) => {
                tracing::warn!("Persistence failure surfaced to client: {}", message);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Could not save your change, please try again".to_string(),
                    true,
                )
            }
            // Throttled repeats are expected; the engine normally absorbs them.
            AppError::DuplicateMutationRejected => {
                (StatusCode::ACCEPTED, self.to_string(), false)
            }
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    false,
                )
            }
            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    false,
                )
            }
            AppError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.clone(), false),
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone(), false),
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone(), false),
            AppError::Configuration(ref message) | AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    false,
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "retryable": retryable
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// Validation helper
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let error_messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error.message.as_ref().unwrap_or(&"Invalid value".into())
                    )
                })
            })
            .collect();

        AppError::Validation(error_messages.join(", "))
    }
}
