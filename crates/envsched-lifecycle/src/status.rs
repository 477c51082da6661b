//! Environment status aggregation

use chrono::{DateTime, Utc};
use envsched_types::{ContainerId, ContainerStatus, EnvironmentId, Phase, Role};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment-level health derived from container statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    /// Every container is running
    Healthy,
    /// Some containers are running, some are not
    Degraded,
    /// No container is running
    Down,
    /// No container answered
    Unknown,
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallHealth::Healthy => write!(f, "healthy"),
            OverallHealth::Degraded => write!(f, "degraded"),
            OverallHealth::Down => write!(f, "down"),
            OverallHealth::Unknown => write!(f, "unknown"),
        }
    }
}

/// Live status of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatusReport {
    pub name: String,
    pub role: Role,
    pub container_id: Option<ContainerId>,
    pub status: ContainerStatus,
}

/// Live status of an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub environment_id: EnvironmentId,
    pub phase: Phase,
    pub health: OverallHealth,

    /// Containers in bring-up order
    pub containers: Vec<ContainerStatusReport>,

    pub checked_at: DateTime<Utc>,
}

/// Summarize container statuses into one health value.
pub fn summarize(containers: &[ContainerStatusReport]) -> OverallHealth {
    let total = containers.len();
    let running = containers.iter().filter(|c| c.status.is_running()).count();
    let unknown = containers
        .iter()
        .filter(|c| c.status == ContainerStatus::Unknown)
        .count();

    if total == 0 || unknown == total {
        OverallHealth::Unknown
    } else if running == total {
        OverallHealth::Healthy
    } else if running == 0 && unknown == 0 {
        OverallHealth::Down
    } else {
        OverallHealth::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: ContainerStatus) -> ContainerStatusReport {
        ContainerStatusReport {
            name: "c".into(),
            role: Role::Backend,
            container_id: None,
            status,
        }
    }

    #[test]
    fn test_summarize() {
        use ContainerStatus::*;

        assert_eq!(summarize(&[]), OverallHealth::Unknown);
        assert_eq!(summarize(&[report(Running), report(Running)]), OverallHealth::Healthy);
        assert_eq!(summarize(&[report(Running), report(Unknown)]), OverallHealth::Degraded);
        assert_eq!(summarize(&[report(Stopped), report(Missing)]), OverallHealth::Down);
        assert_eq!(
            summarize(&[report(Exited { code: 1 }), report(Unknown)]),
            OverallHealth::Degraded
        );
        assert_eq!(summarize(&[report(Unknown)]), OverallHealth::Unknown);
    }
}
