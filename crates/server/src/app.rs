//! Wiring of the bridge and the cleanup operators.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sinkbridge_bridge::{Bridge, BridgeDeps, DirectorySliceReader};
use sinkbridge_cleanup::{JobCleanup, MetadataCleanup};
use sinkbridge_core::OperationContext;
use sinkbridge_crypto::{EncryptionConfig, Encryptor, KeyServiceRegistry, new_encryptor};
use sinkbridge_state::{DistributedLock, HashRingOwnership, Ownership, SingleNodeOwnership};
use sinkbridge_storage::{HookRegistry, StorageRepository};
use sinkbridge_storage_api::HttpStorageApiProvider;

use crate::config::{NodeConfig, SinkbridgeConfig};
use crate::error::ServerError;
use crate::state_factory::create_state;

/// A wired server: the bridge plus the enabled cleanup operators.
pub struct App {
    bridge: Bridge,
    maintenance_token: Option<String>,
    metadata_cleanup: Option<Arc<MetadataCleanup>>,
    job_cleanup: Option<Arc<JobCleanup>>,
}

impl App {
    /// Connect the backends and build every component from `config`.
    pub async fn build(config: &SinkbridgeConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let (store, locks) = create_state(&config.state).await?;
        let encryptor = build_encryptor(&config.encryption).await?;
        let api = HttpStorageApiProvider::builder(&config.storage_api.host)
            .timeout(Duration::from_secs(config.storage_api.timeout_seconds))
            .build()?;

        let storage = StorageRepository::new(store, Arc::new(HookRegistry::new()));
        let deps = BridgeDeps {
            locks: Arc::clone(&locks),
            api: Arc::new(api),
            encryptor,
            slice_reader: Arc::new(DirectorySliceReader::new(&config.slices.root)),
        };
        let bridge = Bridge::new(config.bridge.to_bridge_config(), deps, storage);
        let ownership = build_ownership(&config.node)?;

        Ok(Self::assemble(config, bridge, locks, ownership))
    }

    fn assemble(
        config: &SinkbridgeConfig,
        bridge: Bridge,
        locks: Arc<dyn DistributedLock>,
        ownership: Arc<dyn Ownership>,
    ) -> Self {
        let metadata_cleanup = config.cleanup.metadata.enabled.then(|| {
            Arc::new(MetadataCleanup::new(
                config.cleanup.metadata.to_cleanup_config(),
                bridge.clone(),
                locks,
                Arc::clone(&ownership),
            ))
        });
        let job_cleanup = config.cleanup.jobs.enabled.then(|| {
            Arc::new(JobCleanup::new(
                config.cleanup.jobs.to_cleanup_config(),
                bridge.clone(),
                ownership,
            ))
        });
        Self {
            bridge,
            maintenance_token: config.storage_api.token.clone(),
            metadata_cleanup,
            job_cleanup,
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Run the cleanup operators until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let jobs = self.bridge.load_jobs().await?;
        info!(jobs = jobs.len(), "loaded storage jobs");

        let mut handles = Vec::new();
        if let Some(cleanup) = self.metadata_cleanup {
            handles.push(("metadata", cleanup.spawn(shutdown.clone())));
        }
        if let Some(cleanup) = self.job_cleanup {
            handles.push(("jobs", cleanup.spawn(shutdown.clone())));
        }
        info!(operators = handles.len(), "sinkbridge started");

        shutdown.cancelled().await;
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                warn!(operator = name, error = %e, "cleanup operator panicked");
            }
        }
        info!("sinkbridge stopped");
        Ok(())
    }

    /// Encrypt every token still stored in plaintext.
    pub async fn migrate_tokens(&self) -> Result<usize, ServerError> {
        let now = Utc::now();
        let ctx = match self.maintenance_token.as_deref() {
            Some(token) => OperationContext::authorized(now, token),
            None => OperationContext::background(now),
        };
        Ok(self.bridge.migrate_tokens(&ctx).await?)
    }
}

/// Encryptor of the configured provider, with the key service clients this
/// build supports.
#[cfg_attr(not(feature = "aws-kms"), allow(clippy::unused_async))]
async fn build_encryptor(
    config: &EncryptionConfig,
) -> Result<Option<Arc<dyn Encryptor>>, ServerError> {
    #[cfg_attr(not(feature = "aws-kms"), allow(unused_mut))]
    let mut registry = KeyServiceRegistry::new();

    #[cfg(feature = "aws-kms")]
    if let (sinkbridge_crypto::Provider::Aws, Some(aws)) = (config.provider, config.aws.as_ref()) {
        let service = sinkbridge_crypto::aws::AwsKmsKeyService::from_config(aws).await;
        registry.register(sinkbridge_crypto::Provider::Aws, Arc::new(service));
    }

    Ok(new_encryptor(config, &registry)?)
}

fn build_ownership(config: &NodeConfig) -> Result<Arc<dyn Ownership>, ServerError> {
    match config.id.as_deref() {
        Some(id) if !config.members.is_empty() => {
            info!(node = id, members = config.members.len(), "cleanup work is partitioned");
            Ok(Arc::new(HashRingOwnership::new(id, config.members.clone())?))
        }
        _ => Ok(Arc::new(SingleNodeOwnership)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> SinkbridgeConfig {
        SinkbridgeConfig::parse(toml).unwrap()
    }

    #[tokio::test]
    async fn builds_with_defaults() {
        let app = App::build(&config("")).await.unwrap();
        assert!(app.metadata_cleanup.is_some());
        assert!(app.job_cleanup.is_some());
        assert!(app.bridge().list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_operators_are_not_built() {
        let app = App::build(&config(
            r"
            [cleanup.metadata]
            enabled = false
            [cleanup.jobs]
            enabled = false
            ",
        ))
        .await
        .unwrap();
        assert!(app.metadata_cleanup.is_none());
        assert!(app.job_cleanup.is_none());
    }

    #[tokio::test]
    async fn invalid_config_fails_the_build() {
        let err = App::build(&config("[bridge]\njob_limit = 0")).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[tokio::test]
    async fn external_provider_without_client_fails_the_build() {
        let err = App::build(&config(
            r#"
            [encryption]
            provider = "gcp"
            [encryption.gcp]
            key_id = "projects/p/locations/l/keyRings/r/cryptoKeys/k"
            "#,
        ))
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ServerError::Crypto(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let app = App::build(&config("")).await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(app.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn migration_without_encryption_is_a_no_op() {
        let app = App::build(&config("")).await.unwrap();
        assert_eq!(app.migrate_tokens().await.unwrap(), 0);
    }

    #[test]
    fn ownership_follows_membership() {
        let single = NodeConfig::default();
        assert!(build_ownership(&single).is_ok());

        let ring = NodeConfig {
            id: Some("node-1".into()),
            members: vec!["node-1".into(), "node-2".into()],
        };
        assert!(build_ownership(&ring).is_ok());
    }
}
