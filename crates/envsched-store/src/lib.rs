//! envsched environment store
//!
//! One record per environment: the last accepted specification plus the
//! last observed phase and container map. Writes are compare-and-set on the
//! record's `revision`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod memory;

pub use error::{Result, StoreError};
pub use memory::InMemoryEnvironmentStore;

use async_trait::async_trait;
use envsched_types::{Environment, EnvironmentId};

/// Repository of environment records
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Insert a new record. The stored copy, with its first revision, is returned.
    async fn insert(&self, environment: Environment) -> Result<Environment>;

    async fn get(&self, id: &EnvironmentId) -> Result<Option<Environment>>;

    /// All records, in no particular order.
    async fn list(&self) -> Result<Vec<Environment>>;

    /// Replace a record if its stored revision equals `environment.revision`.
    /// The stored copy, with the bumped revision, is returned.
    async fn update(&self, environment: Environment) -> Result<Environment>;

    /// Remove a record if its stored revision equals `expected_revision`.
    /// Returns `false` if there was nothing to remove.
    async fn remove(&self, id: &EnvironmentId, expected_revision: u64) -> Result<bool>;
}
