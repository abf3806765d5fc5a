use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use uuid::Uuid;

use sinkbridge_state::error::StateError;
use sinkbridge_state::lock::{DistributedLock, LockGuard};

#[derive(Debug, Clone)]
struct LockEntry {
    owner: Uuid,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory [`DistributedLock`] backed by a [`DashMap`].
///
/// Expiry is lazy: an expired entry is replaced on the next acquire attempt
/// for the same name. Clones share the same lock table.
#[derive(Debug, Clone, Default)]
pub struct MemoryDistributedLock {
    locks: Arc<DashMap<String, LockEntry>>,
}

impl MemoryDistributedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live lock of this name exists.
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks.get(name).is_some_and(|e| !e.is_expired())
    }
}

#[async_trait]
impl DistributedLock for MemoryDistributedLock {
    async fn try_lock(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StateError> {
        let owner = Uuid::new_v4();
        let fresh = LockEntry {
            owner,
            expires_at: Instant::now() + ttl,
        };

        let acquired = match self.locks.entry(name.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };

        Ok(acquired.then(|| {
            Box::new(MemoryLockGuard {
                locks: Arc::clone(&self.locks),
                name: name.to_owned(),
                owner,
            }) as Box<dyn LockGuard>
        }))
    }
}

/// Guard for a lock acquired via [`MemoryDistributedLock`].
#[derive(Debug)]
pub struct MemoryLockGuard {
    locks: Arc<DashMap<String, LockEntry>>,
    name: String,
    owner: Uuid,
}

#[async_trait]
impl LockGuard for MemoryLockGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_held(&self) -> Result<bool, StateError> {
        Ok(self
            .locks
            .get(&self.name)
            .is_some_and(|entry| entry.owner == self.owner && !entry.is_expired()))
    }

    async fn release(self: Box<Self>) -> Result<(), StateError> {
        // Only remove if we are still the owner.
        self.locks
            .remove_if(&self.name, |_, entry| entry.owner == self.owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use sinkbridge_state::testing::run_lock_conformance_tests;

    use super::*;

    #[tokio::test]
    async fn conformance() {
        let lock = MemoryDistributedLock::new();
        run_lock_conformance_tests(&lock)
            .await
            .expect("lock conformance tests should pass");
    }

    #[tokio::test(start_paused = true)]
    async fn lock_expires_after_ttl() {
        let lock = MemoryDistributedLock::new();

        let guard = lock
            .try_lock("file/1", Duration::from_secs(2))
            .await
            .unwrap()
            .expect("should acquire");
        assert!(guard.is_held().await.unwrap());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!guard.is_held().await.unwrap());

        let second = lock
            .try_lock("file/1", Duration::from_secs(10))
            .await
            .unwrap()
            .expect("should acquire after TTL expiry");

        // Releasing the stale guard must not free the new owner's lock.
        guard.release().await.unwrap();
        assert!(second.is_held().await.unwrap());
        assert!(lock.is_locked("file/1"));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_lock_waits_for_release() {
        let lock = MemoryDistributedLock::new();
        let guard = lock
            .try_lock("job/sink", Duration::from_secs(60))
            .await
            .unwrap()
            .expect("should acquire");

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.lock("job/sink", Duration::from_secs(5), Duration::from_secs(10))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        guard.release().await.unwrap();

        let acquired = waiter.await.unwrap();
        assert!(acquired.is_ok(), "waiter should acquire after release");
    }

    #[tokio::test]
    async fn concurrent_try_lock_has_single_winner() {
        let lock = MemoryDistributedLock::new();
        let winners = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let lock = lock.clone();
            let winners = Arc::clone(&winners);
            handles.push(tokio::spawn(async move {
                if let Some(guard) = lock
                    .try_lock("contended", Duration::from_secs(60))
                    .await
                    .unwrap()
                {
                    winners.fetch_add(1, Ordering::SeqCst);
                    std::mem::forget(guard);
                }
            }));
        }
        for h in handles {
            h.await.expect("task should not panic");
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
