//! Store error types

use envsched_types::EnvironmentId;
use thiserror::Error;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("environment not found: {0}")]
    NotFound(EnvironmentId),

    #[error("environment already exists: {0}")]
    AlreadyExists(EnvironmentId),

    /// Compare-and-set lost against a concurrent writer
    #[error("revision conflict on {id}: expected {expected}, current {current}")]
    RevisionConflict {
        id: EnvironmentId,
        expected: u64,
        current: u64,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
