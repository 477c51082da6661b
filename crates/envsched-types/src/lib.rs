//! envsched core types
//!
//! Shared data model for the environment scheduler:
//! - Environment specifications (stack roles, container configs)
//! - Specification validation
//! - The environment phase state machine
//! - Environment records and observed container status

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod environment;
pub mod ids;
pub mod phase;
pub mod spec;
pub mod validation;

pub use environment::{
    ContainerRecord, ContainerStatus, Environment, LogEntry, PhaseTransitionError,
};
pub use ids::{ContainerId, EnvironmentId};
pub use phase::Phase;
pub use spec::{
    ApplicationStack, BackendConfig, ContainerConfig, DatabaseConfig, EnvironmentSpecification,
    FrontendConfig, HealthCheck, NetworkConfig, PortMapping, Protocol, ResourceLimits,
    RestartPolicy, Role, StackMember, VolumeMount,
};
pub use validation::{ValidationError, ValidationIssue};
