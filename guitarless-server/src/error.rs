//! Error types for guitarless-server
//!
//! [`PipelineError`] is the taxonomy of job failures; [`ApiError`] maps it
//! (and request-level problems) onto HTTP responses with an `{"error"}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Job failure taxonomy
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Remote source unreachable, invalid or unsupported
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Source rejected by policy (duration ceiling exceeded)
    #[error("{0}")]
    PolicyViolation(String),

    /// Separation engine failed or expected stems are absent
    #[error("Separation failed: {0}")]
    Separation(String),

    /// Reading or writing audio during the remix failed
    #[error("Mix failed: {0}")]
    Mix(String),

    /// File system failure during publish or cleanup
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Short machine-readable kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Fetch(_) => "fetch",
            PipelineError::PolicyViolation(_) => "policy_violation",
            PipelineError::Separation(_) => "separation",
            PipelineError::Mix(_) => "mix",
            PipelineError::Io(_) => "io",
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Pipeline failure (400 for policy violations, otherwise 500)
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// IO error while handling the request itself (500)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(PipelineError::PolicyViolation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg.clone(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
