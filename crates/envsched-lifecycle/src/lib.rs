//! envsched lifecycle controller
//!
//! Creates, starts, stops, restarts, updates and deletes environments by
//! running ordered plans of container steps against the runtime.
//!
//! # Guarantees
//!
//! - Operations on one environment run one at a time, in arrival order
//! - Containers come up database first, then backend, frontend and
//!   additional services; teardown is the reverse
//! - A failed create tears down what it created and leaves the environment
//!   `Failed`
//! - Every completed runtime step is persisted before the next one starts
//!
//! # Key types
//!
//! - [`EnvironmentController`]: the lifecycle operations
//! - [`OperationContext`]: cancellation and deadline for one call
//! - [`LifecycleError`]: error taxonomy, including [`PartialFailure`]

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod executor;
pub mod locks;
pub mod logs;
pub mod page;
pub mod plan;
pub mod status;

pub use config::LifecycleConfig;
pub use context::{Interrupted, OperationContext};
pub use controller::{ContainerUpdateResult, EnvironmentController, UpdateOutcome, UpdateReport};
pub use error::{Compensation, CompensationOutcome, LifecycleError, PartialFailure, Result};
pub use executor::{StepAction, StepError, StepFailure};
pub use locks::{EnvironmentLock, LockRegistry};
pub use logs::{LogEntryStream, LogRequest};
pub use page::{EnvironmentPage, ListRequest};
pub use plan::{ContainerChange, PlannedContainer, UpdatePlan, LABEL_NETWORK};
pub use status::{ContainerStatusReport, EnvironmentStatus, OverallHealth};
