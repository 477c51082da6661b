//! envsched runtime adapter
//!
//! The capability interface the scheduler uses to talk to a container
//! runtime daemon, plus an in-process runtime implementing it.
//!
//! # Key types
//!
//! - [`RuntimeClient`]: operations on one live connection
//! - [`RuntimeConnector`]: dials new connections
//! - [`InMemoryRuntime`]: in-process daemon with fault injection

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod client;
pub mod config;
pub mod error;
pub mod memory;

pub use client::{
    ContainerOptions, LogLine, LogOptions, LogStream, RuntimeClient, RuntimeConnector, StopMode,
    LABEL_CONTAINER, LABEL_ENVIRONMENT, LABEL_ROLE,
};
pub use config::{RuntimeConfig, MEMORY_BACKEND};
pub use error::{Result, RuntimeError};
pub use memory::{InMemoryClient, InMemoryRuntime, RuntimeCall, RuntimeOp};

use std::sync::Arc;

/// Build the connector for the configured backend.
pub fn connector_from_config(config: &RuntimeConfig) -> Result<Arc<dyn RuntimeConnector>> {
    match config.backend.as_str() {
        MEMORY_BACKEND => {
            tracing::info!(namespace = %config.namespace, "Using in-process runtime backend");
            Ok(Arc::new(InMemoryRuntime::new()))
        }
        other => Err(RuntimeError::Operation(format!(
            "unsupported runtime backend '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_from_config() {
        assert!(connector_from_config(&RuntimeConfig::default()).is_ok());

        let config = RuntimeConfig {
            backend: "podman".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(connector_from_config(&config).is_err());
    }
}
