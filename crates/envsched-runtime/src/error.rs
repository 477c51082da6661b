//! Runtime client errors

use thiserror::Error;

/// Errors reported by a runtime client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Container, task or image does not exist
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Runtime daemon cannot be reached
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Client handle was closed, usually because the supervisor replaced it
    #[error("runtime client is closed")]
    Closed,

    /// Runtime rejected or failed the operation
    #[error("runtime operation failed: {0}")]
    Operation(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    /// Whether the error says the connection, rather than the operation, is bad.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RuntimeError::Unavailable(_) | RuntimeError::Timeout(_) | RuntimeError::Closed
        )
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;
