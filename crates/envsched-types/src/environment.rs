//! Environment runtime entity
//!
//! An [`Environment`] is the mutable record the controller keeps for each
//! accepted specification: its phase and the runtime container behind every
//! logical container name.

use crate::ids::{ContainerId, EnvironmentId};
use crate::phase::Phase;
use crate::spec::{EnvironmentSpecification, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Observed status of a runtime container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Container exists, task not started
    Created,
    Running,
    /// Task stopped by request
    Stopped,
    /// Task exited on its own
    Exited { code: i32 },
    /// Runtime did not answer the status query
    Unknown,
    /// Runtime has no such container
    Missing,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Stopped => write!(f, "stopped"),
            ContainerStatus::Exited { code } => write!(f, "exited({})", code),
            ContainerStatus::Unknown => write!(f, "unknown"),
            ContainerStatus::Missing => write!(f, "missing"),
        }
    }
}

/// Runtime binding of one logical container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub role: Role,

    /// Runtime container, absent until created or after removal
    pub container_id: Option<ContainerId>,

    /// Last observed status
    pub status: ContainerStatus,

    /// Runtime container was built from an older specification and an
    /// update has not yet replaced or refreshed it
    #[serde(default)]
    pub out_of_date: bool,

    pub updated_at: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            container_id: None,
            status: ContainerStatus::Missing,
            out_of_date: false,
            updated_at: Utc::now(),
        }
    }

    /// Bind a container created from the current specification.
    pub fn bind(&mut self, container_id: ContainerId, status: ContainerStatus) {
        self.container_id = Some(container_id);
        self.status = status;
        self.out_of_date = false;
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: ContainerStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.container_id = None;
        self.status = ContainerStatus::Missing;
        self.out_of_date = false;
        self.updated_at = Utc::now();
    }

    /// Whether a runtime container exists that predates the specification.
    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date && self.container_id.is_some()
    }
}

/// Rejected phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid phase transition {from} -> {to}")]
pub struct PhaseTransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// A deployed (or deploying) environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,

    /// Last accepted specification
    pub spec: EnvironmentSpecification,

    pub phase: Phase,

    /// Logical container name -> runtime binding
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerRecord>,

    /// Error that moved the environment to `Failed`, if any
    #[serde(default)]
    pub last_error: Option<String>,

    /// Store revision, bumped on every successful write
    #[serde(default)]
    pub revision: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Environment {
    /// Create a pending environment for an accepted specification.
    pub fn new(spec: EnvironmentSpecification) -> Self {
        let now = Utc::now();
        let containers = spec
            .application_stack
            .members()
            .iter()
            .map(|m| (m.container().name.clone(), ContainerRecord::new(m.role())))
            .collect();

        Self {
            id: EnvironmentId::generate(),
            spec,
            phase: Phase::Pending,
            containers,
            last_error: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, enforcing the phase state machine.
    pub fn transition(&mut self, next: Phase) -> Result<(), PhaseTransitionError> {
        if !self.phase.can_transition_to(next) {
            return Err(PhaseTransitionError {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        if next != Phase::Failed {
            self.last_error = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Failed`, remembering why.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.phase = Phase::Failed;
        self.last_error = Some(reason.into());
        self.updated_at = Utc::now();
    }

    pub fn container_ids(&self) -> Vec<ContainerId> {
        self.containers
            .values()
            .filter_map(|r| r.container_id.clone())
            .collect()
    }

    /// Record of a logical container, created on first use.
    pub fn record_mut(&mut self, name: &str, role: &Role) -> &mut ContainerRecord {
        let record = self
            .containers
            .entry(name.to_string())
            .or_insert_with(|| ContainerRecord::new(role.clone()));
        record.role = role.clone();
        record
    }

    pub fn container_id(&self, name: &str) -> Option<&ContainerId> {
        self.containers.get(name).and_then(|r| r.container_id.as_ref())
    }
}

/// One relayed log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub container_name: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::*;

    fn spec() -> EnvironmentSpecification {
        EnvironmentSpecification::new(
            "s1",
            ApplicationStack::new("stack", "1")
                .with_backend(BackendConfig::new(ContainerConfig::new("b", "x")))
                .with_database(DatabaseConfig::new(ContainerConfig::new("db", "postgres"))),
        )
    }

    #[test]
    fn test_new_environment_is_pending_with_records() {
        let env = Environment::new(spec());
        assert_eq!(env.phase, Phase::Pending);
        assert_eq!(env.containers.len(), 2);
        assert_eq!(env.containers["db"].role, Role::Database);
        assert!(env.container_ids().is_empty());
    }

    #[test]
    fn test_transition_enforces_state_machine() {
        let mut env = Environment::new(spec());
        assert!(env.transition(Phase::Running).is_err());
        env.transition(Phase::Creating).unwrap();
        env.transition(Phase::Running).unwrap();
        assert_eq!(env.phase, Phase::Running);
    }

    #[test]
    fn test_fail_records_reason_and_recovery_clears_it() {
        let mut env = Environment::new(spec());
        env.transition(Phase::Creating).unwrap();
        env.fail("pull failed");
        assert_eq!(env.phase, Phase::Failed);
        assert_eq!(env.last_error.as_deref(), Some("pull failed"));

        env.transition(Phase::Running).unwrap();
        assert!(env.last_error.is_none());
    }

    #[test]
    fn test_out_of_date_record_is_reset_by_bind_and_clear() {
        let id = EnvironmentId::generate();
        let mut record = ContainerRecord::new(Role::Backend);
        record.out_of_date = true;
        assert!(!record.is_out_of_date());

        record.bind(ContainerId::generate(&id, "b"), ContainerStatus::Running);
        assert!(!record.is_out_of_date());

        record.out_of_date = true;
        assert!(record.is_out_of_date());
        record.clear();
        assert!(!record.out_of_date);
    }

    #[test]
    fn test_container_status_display() {
        assert_eq!(ContainerStatus::Exited { code: 137 }.to_string(), "exited(137)");
        assert!(ContainerStatus::Running.is_running());
        assert!(!ContainerStatus::Unknown.is_running());
    }
}
