//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use harvest_backend::WorkflowError;
use harvest_core::{CoreError, FilterError};
use serde::Serialize;
use thiserror::Error;

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Filter rejected.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Export/import failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Workflow could not start.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::Filter(FilterError::InvalidPattern(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_filter")
            }
            ApiError::Filter(FilterError::Persist(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
            ApiError::Core(CoreError::Har(_)) => (StatusCode::BAD_REQUEST, "invalid_har"),
            ApiError::Core(CoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ApiError::Core(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            ApiError::Workflow(WorkflowError::AlreadyRunning(_)) => {
                (StatusCode::CONFLICT, "already_running")
            }
            ApiError::Workflow(WorkflowError::NoEntries) => (StatusCode::BAD_REQUEST, "no_entries"),
            ApiError::Workflow(_) => (StatusCode::BAD_GATEWAY, "workflow_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
