//! Runtime client capability
//!
//! [`RuntimeClient`] is the narrow set of operations the lifecycle
//! controller needs from a container runtime daemon. It carries no
//! orchestration logic: ordering, retries and compensation live above it.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envsched_types::{
    ContainerConfig, ContainerId, ContainerStatus, PortMapping, ResourceLimits, RestartPolicy,
    VolumeMount,
};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Label holding the owning environment ID.
pub const LABEL_ENVIRONMENT: &str = "envsched.environment";

/// Label holding the stack role of a container.
pub const LABEL_ROLE: &str = "envsched.role";

/// Label holding the logical container name.
pub const LABEL_CONTAINER: &str = "envsched.container";

/// How a task should be stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// SIGTERM, let the process shut down
    Graceful,
    /// SIGKILL
    Kill,
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopMode::Graceful => write!(f, "graceful"),
            StopMode::Kill => write!(f, "kill"),
        }
    }
}

/// Everything the runtime needs to create one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerOptions {
    /// Logical container name
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub resources: ResourceLimits,
    pub restart_policy: RestartPolicy,
    pub labels: BTreeMap<String, String>,
}

impl ContainerOptions {
    /// Options for a container config; labels start empty.
    pub fn from_config(config: &ContainerConfig) -> Self {
        Self {
            name: config.name.clone(),
            image: config.image.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.environment.clone(),
            ports: config.ports.clone(),
            volumes: config.volumes.clone(),
            resources: config.resources.clone(),
            restart_policy: config.restart_policy,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels<'a>(
        mut self,
        labels: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        for (key, value) in labels {
            self.labels.insert(key.clone(), value.clone());
        }
        self
    }
}

/// Options for a log read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    /// Only lines at or after this instant
    pub since: Option<DateTime<Utc>>,

    /// Only the last N lines of history
    pub tail: Option<usize>,

    /// Keep the stream open for new lines
    pub follow: bool,
}

/// One line of container output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Lazy sequence of log lines; `None` ends the stream normally
pub type LogStream = BoxStream<'static, Result<LogLine>>;

/// Operations against a single connected runtime daemon
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Round-trip to the daemon.
    async fn ping(&self) -> Result<()>;

    async fn has_image(&self, image: &str) -> Result<bool>;

    async fn pull_image(&self, image: &str) -> Result<()>;

    async fn create_container(&self, id: &ContainerId, options: &ContainerOptions) -> Result<()>;

    async fn start_task(&self, id: &ContainerId) -> Result<()>;

    async fn stop_task(&self, id: &ContainerId, mode: StopMode) -> Result<()>;

    /// Delete a container and any task it still has.
    async fn delete_container(&self, id: &ContainerId) -> Result<()>;

    async fn container_status(&self, id: &ContainerId) -> Result<ContainerStatus>;

    async fn list_containers(&self) -> Result<Vec<ContainerId>>;

    /// Replace the labels of an existing container.
    async fn set_labels(&self, id: &ContainerId, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Run a probe command inside the container; `Ok(false)` means the probe ran and failed.
    async fn exec_probe(&self, id: &ContainerId, command: &[String], timeout: Duration)
        -> Result<bool>;

    async fn stream_logs(&self, id: &ContainerId, options: LogOptions) -> Result<LogStream>;

    /// Release the connection. Later calls fail with `RuntimeError::Closed`.
    async fn close(&self);
}

/// Dials fresh runtime clients
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RuntimeClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsched_types::ContainerConfig;

    #[test]
    fn test_options_from_config() {
        let config = ContainerConfig::new("api", "node:18")
            .with_env("PORT", "3000")
            .with_port(3000, 8080);
        let options = ContainerOptions::from_config(&config)
            .with_label(LABEL_CONTAINER, "api")
            .with_label(LABEL_ROLE, "backend");

        assert_eq!(options.name, "api");
        assert_eq!(options.env["PORT"], "3000");
        assert_eq!(options.ports[0].host_port, 8080);
        assert_eq!(options.labels.len(), 2);
    }
}
