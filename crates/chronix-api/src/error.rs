//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use chronix_core::SchedulerError;

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body or parameters rejected.
    #[error("{0}")]
    BadRequest(String),

    /// Resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Anything the caller cannot fix.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Validation(msg) => ApiError::BadRequest(msg),
            SchedulerError::TaskNotFound(id) => ApiError::NotFound(format!("Task '{}' not found", id)),
            other => {
                error!("Scheduler error: {}", other);
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({"error": self.to_string()})),
        )
            .into_response()
    }
}
