//! Connection supervisor errors

use crate::state::ConnectionState;
use envsched_runtime::RuntimeError;
use thiserror::Error;

/// Errors from the connection supervisor
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Initial dial or ping failed
    #[error("failed to connect to runtime: {0}")]
    Connect(#[source] RuntimeError),

    /// No live client to hand out
    #[error("runtime connection is not available (state: {0})")]
    NotConnected(ConnectionState),

    #[error("connection supervisor is already started")]
    AlreadyStarted,

    /// Supervisor was stopped; a new one is needed
    #[error("connection supervisor has been stopped")]
    Stopped,
}

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
