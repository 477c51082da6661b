//! Error types for envsched-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use envsched_connection::ConnectionError;
use envsched_lifecycle::LifecycleError;
use envsched_runtime::RuntimeError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime backend error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The runtime could not be reached at startup
    #[error("Runtime connectivity error: {0}")]
    Connectivity(#[from] ConnectionError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or query parameter
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Lifecycle(e) => match e {
                LifecycleError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
                LifecycleError::Conflict(_) => StatusCode::CONFLICT,
                LifecycleError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
                LifecycleError::PartialFailure(_)
                | LifecycleError::Runtime { .. }
                | LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Lifecycle(e) => e.code(),
        }
    }

    /// Body of the error, shared by JSON responses and log stream error events.
    pub fn body(&self) -> ErrorResponse {
        let details = match self {
            ApiError::Lifecycle(LifecycleError::Validation(e)) => {
                serde_json::to_value(&e.issues).ok()
            }
            ApiError::Lifecycle(LifecycleError::PartialFailure(failure)) => {
                serde_json::to_value(failure.as_ref()).ok()
            }
            _ => None,
        };

        ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
