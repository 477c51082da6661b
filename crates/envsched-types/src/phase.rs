//! Environment phase state machine
//!
//! ```text
//! Pending -> Creating -> Running <-> Stopped
//! Running|Stopped -> Restarting -> Running
//! Running|Stopped -> Updating -> Running
//! any non-terminal -> Deleting -> Deleted
//! transient -> Failed (retryable)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Phase {
    Pending,
    Creating,
    Running,
    Stopped,
    Restarting,
    Updating,
    Deleting,
    Deleted,
    Failed,
}

impl Phase {
    /// Phases that only exist while an operation is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Phase::Creating | Phase::Restarting | Phase::Updating | Phase::Deleting
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Deleted)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;

        if self.is_terminal() {
            return false;
        }
        if next == Deleting {
            return true;
        }

        match (self, next) {
            (Pending, Creating) => true,
            (Creating, Running) | (Creating, Failed) => true,
            (Running, Stopped) | (Running, Restarting) | (Running, Updating) => true,
            (Running, Failed) => true,
            (Stopped, Running) | (Stopped, Restarting) | (Stopped, Updating) => true,
            (Stopped, Failed) => true,
            (Restarting, Running) | (Restarting, Failed) => true,
            (Updating, Running) | (Updating, Failed) => true,
            (Deleting, Deleted) | (Deleting, Failed) => true,
            (Failed, Running)
            | (Failed, Stopped)
            | (Failed, Restarting)
            | (Failed, Updating)
            | (Failed, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Pending => "Pending",
            Phase::Creating => "Creating",
            Phase::Running => "Running",
            Phase::Stopped => "Stopped",
            Phase::Restarting => "Restarting",
            Phase::Updating => "Updating",
            Phase::Deleting => "Deleting",
            Phase::Deleted => "Deleted",
            Phase::Failed => "Failed",
        };
        f.write_str(name)
    }
}
