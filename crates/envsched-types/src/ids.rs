//! Strongly-typed identifiers for environments and runtime containers
//!
//! Environment IDs are UUID-based; container IDs are opaque strings chosen
//! by the controller and handed to the runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentId(Uuid);

impl EnvironmentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Prefix shared by every runtime container ID owned by this environment.
    pub fn container_prefix(&self) -> String {
        format!("{}-", self.0.simple())
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env-{}", self.0)
    }
}

impl FromStr for EnvironmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("env-").unwrap_or(s);
        Uuid::parse_str(raw).map(Self)
    }
}

/// Identifier of a container inside the runtime daemon
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh container ID for a logical container of an environment.
    ///
    /// Every call yields a new ID, so a recreated container never reuses the
    /// ID of the one it replaces.
    pub fn generate(environment: &EnvironmentId, container_name: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}{}-{}",
            environment.container_prefix(),
            container_name,
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this container ID was generated for the given environment.
    pub fn belongs_to(&self, environment: &EnvironmentId) -> bool {
        self.0.starts_with(&environment.container_prefix())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
