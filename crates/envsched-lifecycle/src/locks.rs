//! Per-environment lock registry

use dashmap::DashMap;
use envsched_types::EnvironmentId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<EnvironmentId, Arc<Mutex<()>>>;

/// One mutex per environment ID
///
/// Tokio's mutex is fair: waiters are granted the lock in the order they
/// asked for it, so operations on one environment run in FIFO order.
/// An entry lives only while someone holds or waits for its lock.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Arc<LockMap>,
}

/// Exclusive access to one environment, released on drop
#[derive(Debug)]
pub struct EnvironmentLock {
    id: EnvironmentId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one environment.
    pub async fn lock(&self, id: EnvironmentId) -> EnvironmentLock {
        let mutex = Arc::clone(self.locks.entry(id).or_default().value());
        let guard = mutex.lock_owned().await;
        EnvironmentLock {
            id,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Drop the entry of `id` if nobody holds or waits for it.
    ///
    /// Needed after a waiter gave up before being granted the lock.
    pub fn prune(&self, id: &EnvironmentId) {
        prune(&self.locks, id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for EnvironmentLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.locks, &self.id);
    }
}

fn prune(locks: &LockMap, id: &EnvironmentId) {
    // The map's own reference is the only one left when nobody is queued
    locks.remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_waiters_are_granted_in_request_order() {
        let registry = Arc::new(LockRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let id = EnvironmentId::generate();

        let first = registry.lock(id).await;
        let mut waiters = Vec::new();
        for i in 0..5u32 {
            let registry = Arc::clone(&registry);
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                let _guard = registry.lock(id).await;
                order.lock().await.push(i);
            }));
            // Let the waiter enqueue before spawning the next one
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        }

        drop(first);
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_distinct_environments_do_not_block() {
        let registry = LockRegistry::new();
        let a = registry.lock(EnvironmentId::generate()).await;
        let b = registry.lock(EnvironmentId::generate()).await;
        assert_eq!(registry.len(), 2);

        drop(a);
        drop(b);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_entry_outlives_release_while_others_wait() {
        let registry = Arc::new(LockRegistry::new());
        let id = EnvironmentId::generate();

        let first = registry.lock(id).await;
        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _guard = registry.lock(id).await;
            })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        drop(first);
        assert_eq!(registry.len(), 1);
        waiter.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_pruned() {
        let registry = LockRegistry::new();
        let id = EnvironmentId::generate();

        let held = registry.lock(id).await;
        let gave_up = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            registry.lock(id),
        )
        .await;
        assert!(gave_up.is_err());

        drop(held);
        registry.prune(&id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_many_short_locks_leave_no_entries() {
        let registry = LockRegistry::new();
        for _ in 0..1000 {
            let _guard = registry.lock(EnvironmentId::generate()).await;
        }
        assert_eq!(registry.len(), 0);
    }
}
