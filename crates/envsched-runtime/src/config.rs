//! Runtime connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backend name of the in-process runtime.
pub const MEMORY_BACKEND: &str = "memory";

/// Where and how to reach the container runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime backend
    pub backend: String,

    /// Runtime daemon socket path
    pub socket: String,

    /// Namespace containers are created in
    pub namespace: String,

    /// Bound on the initial dial + ping
    pub dial_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: MEMORY_BACKEND.to_string(),
            socket: "/run/containerd/containerd.sock".to_string(),
            namespace: "scheduler".to_string(),
            dial_timeout_secs: 5,
        }
    }
}

impl RuntimeConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}
