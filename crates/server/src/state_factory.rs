use std::sync::Arc;

use sinkbridge_state::{DistributedLock, MetadataStore};
use sinkbridge_state_memory::{MemoryDistributedLock, MemoryMetadataStore};

use crate::config::StateConfig;
use crate::error::ServerError;

/// Create the metadata store and the distributed lock from the given
/// configuration.
///
/// Both share one backend connection.
#[allow(clippy::unused_async)]
pub async fn create_state(
    config: &StateConfig,
) -> Result<(Arc<dyn MetadataStore>, Arc<dyn DistributedLock>), ServerError> {
    match config.backend.as_str() {
        "memory" => Ok((
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryDistributedLock::new()),
        )),
        #[cfg(feature = "etcd")]
        "etcd" => {
            use std::time::Duration;

            use sinkbridge_state_etcd::{EtcdConfig, EtcdDistributedLock, EtcdMetadataStore};

            let etcd_config = EtcdConfig {
                endpoints: config.endpoints.clone(),
                prefix: config.prefix.clone(),
                connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
            };
            let store = EtcdMetadataStore::new(etcd_config).await?;
            let lock = EtcdDistributedLock::from_client(store.client(), store.config());
            Ok((Arc::new(store), Arc::new(lock)))
        }
        #[cfg(not(feature = "etcd"))]
        "etcd" => Err(ServerError::Config(
            "etcd backend requires the `etcd` feature".into(),
        )),
        other => Err(ServerError::Config(format!(
            "unknown state backend: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn memory_backend() {
        let (store, lock) = create_state(&StateConfig::default()).await.unwrap();
        let guard = lock
            .try_lock("file/1", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(guard.is_some());
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let config = StateConfig {
            backend: "redis".into(),
            ..StateConfig::default()
        };
        let err = create_state(&config).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
