use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateError;

/// Interval between attempts of a blocking [`DistributedLock::lock`].
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A held distributed lock. Dropping without explicit release is allowed
/// (the lock will expire after its TTL), but explicit release is preferred.
#[async_trait]
pub trait LockGuard: Send + Sync {
    /// Name the lock was acquired under.
    fn name(&self) -> &str;

    /// Check if the lock is still held by this guard.
    async fn is_held(&self) -> Result<bool, StateError>;

    /// Explicitly release the lock.
    async fn release(self: Box<Self>) -> Result<(), StateError>;
}

/// Named mutual exclusion shared by every process using the same backend.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to acquire the lock once.
    /// Returns `None` if the lock is already held by another owner.
    async fn try_lock(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StateError>;

    /// Acquire the lock, waiting up to `timeout` for it to become available.
    async fn lock(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StateError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(guard) = self.try_lock(name, ttl).await? {
                return Ok(guard);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(StateError::Timeout(timeout));
            }

            tokio::time::sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety of both traits.
    fn _assert_dyn_lock_guard(_: &dyn LockGuard) {}
    fn _assert_dyn_distributed_lock(_: &dyn DistributedLock) {}
}
