//! envsched runtime connection supervision
//!
//! [`ConnectionSupervisor`] owns the one runtime client of the process,
//! health-checks it and reconnects after failures. Callers obtain a
//! [`RuntimeHandle`] per operation through
//! [`ConnectionSupervisor::acquire`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod state;
pub mod supervisor;

pub use error::{ConnectionError, Result};
pub use state::{ConnectionHealth, ConnectionState, SupervisorConfig};
pub use supervisor::{ConnectionSupervisor, RuntimeHandle};
