//! Daemon configuration
//!
//! Layered: built-in defaults, then an optional file, then `ENVSCHED__*`
//! environment variables (e.g. `ENVSCHED__SERVER__LISTEN_ADDR`), then CLI
//! overrides applied by the binary.

use envsched_connection::SupervisorConfig;
use envsched_lifecycle::LifecycleConfig;
use envsched_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "ENVSCHED";

/// Separator between prefix and nested keys in environment variables
pub const ENV_SEPARATOR: &str = "__";

/// Main daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Container runtime backend
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Runtime connection supervision
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Lifecycle timing and paging
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Deadline applied to lifecycle requests that do not set their own
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            enable_cors: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8000))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&DaemonConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
