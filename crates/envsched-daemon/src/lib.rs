//! envsched daemon library
//!
//! - [`SchedulerService`]: transport-agnostic facade over the lifecycle controller
//! - REST API (`/api/v1`) with server-sent log streams
//! - Layered configuration
//! - Server lifecycle with graceful shutdown

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod service;

pub use config::{DaemonConfig, LoggingConfig, ServerConfig};
pub use error::{ApiError, ApiResult, DaemonError, DaemonResult, ErrorResponse};
pub use server::Server;
pub use service::SchedulerService;
