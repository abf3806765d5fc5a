use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, PutOptions, Txn, TxnOp};
use tokio::sync::Mutex;

use sinkbridge_state::error::StateError;
use sinkbridge_state::lock::{DistributedLock, LockGuard};

use crate::config::EtcdConfig;

/// etcd-backed implementation of [`DistributedLock`].
///
/// Each acquisition grants a lease with the requested TTL and writes the lock
/// key under it only if the key does not exist yet.
pub struct EtcdDistributedLock {
    client: Arc<Mutex<Client>>,
    config: Arc<EtcdConfig>,
}

impl EtcdDistributedLock {
    /// Create a new `EtcdDistributedLock` by connecting to etcd.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if the connection cannot be
    /// established.
    pub async fn new(config: EtcdConfig) -> Result<Self, StateError> {
        let client = Client::connect(
            config.endpoints.clone(),
            Some(etcd_client::ConnectOptions::new().with_timeout(config.connect_timeout)),
        )
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            config: Arc::new(config),
        })
    }

    /// Create an `EtcdDistributedLock` sharing the client of a store.
    pub fn from_client(client: Arc<Mutex<Client>>, config: Arc<EtcdConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl DistributedLock for EtcdDistributedLock {
    async fn try_lock(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StateError> {
        let lock_key = self.config.lock_key(name);
        let owner = uuid::Uuid::new_v4().to_string();
        let ttl_secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);

        let mut client = self.client.lock().await;

        let lease_id = client
            .lease_grant(ttl_secs, None)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?
            .id();

        let txn = Txn::new()
            .when([Compare::create_revision(
                lock_key.clone(),
                CompareOp::Equal,
                0,
            )])
            .and_then([TxnOp::put(
                lock_key.clone(),
                owner.as_bytes(),
                Some(PutOptions::new().with_lease(lease_id)),
            )]);

        let resp = client
            .txn(txn)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        if resp.succeeded() {
            Ok(Some(Box::new(EtcdLockGuard {
                client: Arc::clone(&self.client),
                name: name.to_owned(),
                lock_key,
                owner,
                lease_id,
            })))
        } else {
            // Held by someone else; the unused lease is revoked.
            if let Err(e) = client.lease_revoke(lease_id).await {
                tracing::debug!(lease_id, error = %e, "failed to revoke unused lease");
            }
            Ok(None)
        }
    }
}

/// A held distributed lock backed by an etcd lease.
///
/// Dropping the guard without calling [`release`](LockGuard::release) is
/// safe; etcd deletes the key once the lease expires.
pub struct EtcdLockGuard {
    client: Arc<Mutex<Client>>,
    name: String,
    lock_key: String,
    owner: String,
    lease_id: i64,
}

#[async_trait]
impl LockGuard for EtcdLockGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_held(&self) -> Result<bool, StateError> {
        let mut client = self.client.lock().await;
        let resp = client
            .get(self.lock_key.clone(), None)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(resp
            .kvs()
            .first()
            .is_some_and(|kv| kv.value() == self.owner.as_bytes()))
    }

    async fn release(self: Box<Self>) -> Result<(), StateError> {
        let mut client = self.client.lock().await;

        // Delete only while the key still carries our owner id.
        let txn = Txn::new()
            .when([Compare::value(
                self.lock_key.clone(),
                CompareOp::Equal,
                self.owner.as_bytes(),
            )])
            .and_then([TxnOp::delete(self.lock_key.clone(), None)]);
        client
            .txn(txn)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        client
            .lease_revoke(self.lease_id)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }
}
