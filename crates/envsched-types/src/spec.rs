//! Environment specification types
//!
//! An [`EnvironmentSpecification`] is the immutable operator input: an
//! application stack made of optional frontend/backend/database roles plus
//! any number of additional services, each backed by one [`ContainerConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Host path mounted into a database container with persistent storage.
pub const PERSISTENT_DATA_MOUNT_PATH: &str = "/var/lib/envsched/data";

/// Volume name used for the persistent storage mount of a database.
pub const PERSISTENT_DATA_VOLUME: &str = "persistent-data";

/// Operator-supplied description of one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpecification {
    /// Environment name
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// The stack to deploy
    pub application_stack: ApplicationStack,

    /// Labels used for filtering and propagated to every container
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Optional network settings
    #[serde(default)]
    pub network: Option<NetworkConfig>,
}

impl EnvironmentSpecification {
    pub fn new(name: impl Into<String>, application_stack: ApplicationStack) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            application_stack,
            labels: BTreeMap::new(),
            network: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    /// Whether every `(key, value)` pair in `filters` is present on this spec.
    pub fn matches_labels(&self, filters: &BTreeMap<String, String>) -> bool {
        filters
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }
}

/// A named, versioned application stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStack {
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub frontend: Option<FrontendConfig>,

    #[serde(default)]
    pub backend: Option<BackendConfig>,

    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Auxiliary services keyed by service name, deployed in key order
    #[serde(default)]
    pub additional_services: BTreeMap<String, ContainerConfig>,
}

impl ApplicationStack {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            frontend: None,
            backend: None,
            database: None,
            additional_services: BTreeMap::new(),
        }
    }

    pub fn with_frontend(mut self, frontend: FrontendConfig) -> Self {
        self.frontend = Some(frontend);
        self
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_service(mut self, key: impl Into<String>, container: ContainerConfig) -> Self {
        self.additional_services.insert(key.into(), container);
        self
    }

    /// Members of the stack in dependency order: database, backend,
    /// frontend, then additional services in key order. Unset roles are
    /// skipped.
    pub fn members(&self) -> Vec<StackMember<'_>> {
        let mut members = Vec::with_capacity(3 + self.additional_services.len());
        if let Some(database) = &self.database {
            members.push(StackMember::Database(database));
        }
        if let Some(backend) = &self.backend {
            members.push(StackMember::Backend(backend));
        }
        if let Some(frontend) = &self.frontend {
            members.push(StackMember::Frontend(frontend));
        }
        for (key, container) in &self.additional_services {
            members.push(StackMember::Service { key, container });
        }
        members
    }

    pub fn is_empty(&self) -> bool {
        self.database.is_none()
            && self.backend.is_none()
            && self.frontend.is_none()
            && self.additional_services.is_empty()
    }
}

/// Role a container plays within its stack.
///
/// The derived ordering is the dependency order used for bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "service", rename_all = "snake_case")]
pub enum Role {
    Database,
    Backend,
    Frontend,
    Service(String),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Database => write!(f, "database"),
            Role::Backend => write!(f, "backend"),
            Role::Frontend => write!(f, "frontend"),
            Role::Service(key) => write!(f, "service:{}", key),
        }
    }
}

/// A stack member: the shared container config tagged with its role extras
#[derive(Debug, Clone, Copy)]
pub enum StackMember<'a> {
    Database(&'a DatabaseConfig),
    Backend(&'a BackendConfig),
    Frontend(&'a FrontendConfig),
    Service {
        key: &'a str,
        container: &'a ContainerConfig,
    },
}

impl<'a> StackMember<'a> {
    pub fn role(&self) -> Role {
        match self {
            StackMember::Database(_) => Role::Database,
            StackMember::Backend(_) => Role::Backend,
            StackMember::Frontend(_) => Role::Frontend,
            StackMember::Service { key, .. } => Role::Service((*key).to_string()),
        }
    }

    pub fn container(&self) -> &'a ContainerConfig {
        match self {
            StackMember::Database(db) => &db.container,
            StackMember::Backend(backend) => &backend.container,
            StackMember::Frontend(frontend) => &frontend.container,
            StackMember::Service { container, .. } => container,
        }
    }

    /// Container config with role extras folded in, as handed to the runtime.
    pub fn effective_container(&self) -> ContainerConfig {
        let mut container = self.container().clone();
        if let StackMember::Database(db) = self {
            if db.persistent_storage {
                if let Some(path) = &db.storage_path {
                    let mounted = container
                        .volumes
                        .iter()
                        .any(|v| v.host_path.as_deref() == Some(path.as_str()));
                    if !mounted {
                        container.volumes.push(VolumeMount {
                            name: PERSISTENT_DATA_VOLUME.to_string(),
                            mount_path: PERSISTENT_DATA_MOUNT_PATH.to_string(),
                            host_path: Some(path.clone()),
                            read_only: false,
                        });
                    }
                }
            }
        }
        container
    }
}

/// Frontend role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendConfig {
    pub container: ContainerConfig,

    /// Domains served by this frontend
    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default)]
    pub ssl_enabled: bool,
}

impl FrontendConfig {
    pub fn new(container: ContainerConfig) -> Self {
        Self {
            container,
            domains: Vec::new(),
            ssl_enabled: false,
        }
    }
}

/// Backend role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub container: ContainerConfig,

    #[serde(default)]
    pub database_connection_string: Option<String>,
}

impl BackendConfig {
    pub fn new(container: ContainerConfig) -> Self {
        Self {
            container,
            database_connection_string: None,
        }
    }
}

/// Database role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub container: ContainerConfig,

    #[serde(default)]
    pub database_name: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Keep data on the host across container recreation
    #[serde(default)]
    pub persistent_storage: bool,

    /// Host path backing persistent storage
    #[serde(default)]
    pub storage_path: Option<String>,
}

impl DatabaseConfig {
    pub fn new(container: ContainerConfig) -> Self {
        Self {
            container,
            database_name: None,
            username: None,
            password: None,
            persistent_storage: false,
            storage_path: None,
        }
    }
}

/// One deployable container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Logical name, unique within the environment
    pub name: String,

    /// Image reference
    pub image: String,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub ports: Vec<PortMapping>,

    /// Environment variables
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub volumes: Vec<VolumeMount>,

    #[serde(default)]
    pub resources: ResourceLimits,

    #[serde(default)]
    pub health_check: Option<HealthCheck>,

    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

impl ContainerConfig {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            ports: Vec::new(),
            environment: BTreeMap::new(),
            volumes: Vec::new(),
            resources: ResourceLimits::default(),
            health_check: None,
            restart_policy: RestartPolicy::default(),
        }
    }

    pub fn with_resources(mut self, resources: ResourceLimits) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheck) -> Self {
        self.health_check = Some(health_check);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.push(PortMapping {
            container_port,
            host_port,
            protocol: Protocol::Tcp,
        });
        self
    }
}

/// Port exposed by a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,

    /// Host port, 0 when not published
    #[serde(default)]
    pub host_port: u16,

    #[serde(default)]
    pub protocol: Protocol,
}

/// Transport protocol of a port mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Volume mounted into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,

    /// Host path for bind mounts, named volume otherwise
    #[serde(default)]
    pub host_path: Option<String>,

    #[serde(default)]
    pub read_only: bool,
}

/// Resource limits; zero means unlimited
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub memory_mb: u64,

    /// Fractional CPU cores
    #[serde(default)]
    pub cpu_cores: f64,

    #[serde(default)]
    pub disk_mb: u64,
}

impl ResourceLimits {
    pub fn memory(memory_mb: u64) -> Self {
        Self {
            memory_mb,
            ..Self::default()
        }
    }
}

/// Container health check; all durations in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub command: Vec<String>,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub retries: u32,

    /// Grace window before failures count
    #[serde(default)]
    pub start_period_seconds: u32,
}

impl HealthCheck {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_seconds))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_seconds))
    }

    pub fn start_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.start_period_seconds))
    }
}

/// Restart policy applied by the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    Never,
    OnFailure,
    Always,
    UnlessStopped,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Never => write!(f, "never"),
            RestartPolicy::OnFailure => write!(f, "on-failure"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

/// Network settings for an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network_name: String,

    #[serde(default)]
    pub subnet: Option<String>,

    #[serde(default)]
    pub gateway: Option<String>,

    /// Deny traffic from outside the environment
    #[serde(default)]
    pub isolated: bool,
}
