//! In-memory environment store

use crate::error::{Result, StoreError};
use crate::EnvironmentStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use envsched_types::{Environment, EnvironmentId};
use tracing::trace;

/// In-memory store for development and testing
#[derive(Debug, Default)]
pub struct InMemoryEnvironmentStore {
    environments: DashMap<EnvironmentId, Environment>,
}

impl InMemoryEnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

#[async_trait]
impl EnvironmentStore for InMemoryEnvironmentStore {
    async fn insert(&self, mut environment: Environment) -> Result<Environment> {
        match self.environments.entry(environment.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(environment.id)),
            Entry::Vacant(slot) => {
                environment.revision = 1;
                slot.insert(environment.clone());
                trace!(environment_id = %environment.id, "Environment record inserted");
                Ok(environment)
            }
        }
    }

    async fn get(&self, id: &EnvironmentId) -> Result<Option<Environment>> {
        Ok(self.environments.get(id).map(|e| e.clone()))
    }

    async fn list(&self) -> Result<Vec<Environment>> {
        Ok(self
            .environments
            .iter()
            .map(|e| e.value().clone())
            .collect())
    }

    async fn update(&self, mut environment: Environment) -> Result<Environment> {
        let mut stored = self
            .environments
            .get_mut(&environment.id)
            .ok_or(StoreError::NotFound(environment.id))?;

        if stored.revision != environment.revision {
            return Err(StoreError::RevisionConflict {
                id: environment.id,
                expected: environment.revision,
                current: stored.revision,
            });
        }

        environment.revision += 1;
        *stored = environment.clone();
        trace!(
            environment_id = %environment.id,
            revision = environment.revision,
            "Environment record updated"
        );
        Ok(environment)
    }

    async fn remove(&self, id: &EnvironmentId, expected_revision: u64) -> Result<bool> {
        if self
            .environments
            .remove_if(id, |_, stored| stored.revision == expected_revision)
            .is_some()
        {
            trace!(environment_id = %id, "Environment record removed");
            return Ok(true);
        }

        match self.environments.get(id) {
            None => Ok(false),
            Some(stored) => Err(StoreError::RevisionConflict {
                id: *id,
                expected: expected_revision,
                current: stored.revision,
            }),
        }
    }
}
