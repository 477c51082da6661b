//! Lifecycle controller configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controller timing and paging limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a graceful stop may take before the task is killed
    pub stop_grace_period_secs: u64,

    /// Bound on one container status query
    pub status_query_timeout_secs: u64,

    /// Bound on waiting for one container to become healthy
    pub health_wait_timeout_secs: u64,

    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace_period_secs: 10,
            status_query_timeout_secs: 5,
            health_wait_timeout_secs: 300,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl LifecycleConfig {
    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.stop_grace_period_secs)
    }

    pub fn status_query_timeout(&self) -> Duration {
        Duration::from_secs(self.status_query_timeout_secs)
    }

    pub fn health_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.health_wait_timeout_secs)
    }

    /// Requested page size, defaulted and clamped.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|size| *size > 0)
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size)
            .max(1)
    }
}
