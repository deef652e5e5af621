//! Error types for the web surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use shortcast_scheduler::SchedulerError;

/// Errors that can occur serving HTTP.
#[derive(Debug, Error)]
pub enum WebError {
    /// Scheduler refused the request.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::Scheduler(SchedulerError::RunInProgress(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
