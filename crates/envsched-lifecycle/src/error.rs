//! Lifecycle error taxonomy
//!
//! Every controller call returns a success payload or exactly one of these.

use envsched_connection::ConnectionError;
use envsched_runtime::RuntimeError;
use envsched_store::StoreError;
use envsched_types::{EnvironmentId, PhaseTransitionError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Outcome of one compensating action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CompensationOutcome {
    Succeeded,
    Failed { error: String },
}

/// A compensating action attempted after a plan failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensation {
    pub container: String,
    pub action: String,
    pub outcome: CompensationOutcome,
}

/// A multi-step plan that failed partway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub environment_id: EnvironmentId,

    /// Zero-based index of the failed step in the plan
    pub step_index: usize,

    /// Action and logical container of the failed step, e.g. `start api`
    pub step: String,

    pub cause: String,

    /// Compensations in the order they were attempted
    pub compensations: Vec<Compensation>,
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} ({}) of {} failed: {}",
            self.step_index, self.step, self.environment_id, self.cause
        )?;
        if !self.compensations.is_empty() {
            write!(f, " ({} compensating actions attempted)", self.compensations.len())?;
        }
        Ok(())
    }
}

/// Lifecycle controller errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is not valid for the current phase
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("runtime connectivity: {0}")]
    Connectivity(#[from] ConnectionError),

    #[error("partial failure: {0}")]
    PartialFailure(Box<PartialFailure>),

    #[error("runtime error on {container}: {source}")]
    Runtime {
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("environment store: {0}")]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub(crate) fn environment_not_found(id: &EnvironmentId) -> Self {
        LifecycleError::NotFound(format!("environment {}", id))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::Validation(_) => "VALIDATION_ERROR",
            LifecycleError::NotFound(_) => "NOT_FOUND",
            LifecycleError::Conflict(_) => "CONFLICT",
            LifecycleError::Connectivity(_) => "CONNECTIVITY_ERROR",
            LifecycleError::PartialFailure(_) => "PARTIAL_FAILURE",
            LifecycleError::Runtime { .. } => "RUNTIME_ERROR",
            LifecycleError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn as_partial_failure(&self) -> Option<&PartialFailure> {
        match self {
            LifecycleError::PartialFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<PartialFailure> for LifecycleError {
    fn from(failure: PartialFailure) -> Self {
        LifecycleError::PartialFailure(Box::new(failure))
    }
}

impl From<PhaseTransitionError> for LifecycleError {
    fn from(e: PhaseTransitionError) -> Self {
        LifecycleError::Conflict(e.to_string())
    }
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
