use std::fmt;
use std::sync::Arc;

use sinkbridge_core::{File, FileKey, OperationContext, Sink, Slice, SliceKey};
use sinkbridge_crypto::Encryptor;
use sinkbridge_state::{AtomicOp, DistributedLock};
use sinkbridge_storage::StorageRepository;
use sinkbridge_storage_api::{StorageApi, StorageApiError, StorageApiProvider};
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::dedup::Deduplicator;
use crate::error::BridgeError;
use crate::hooks::BridgeHooks;
use crate::model::Job;
use crate::repository::BridgeRepository;
use crate::table::EnsuredBucket;
use crate::upload::SliceReader;

/// External services the bridge works with.
pub struct BridgeDeps {
    pub locks: Arc<dyn DistributedLock>,
    pub api: Arc<dyn StorageApiProvider>,
    /// Encrypts tokens and upload credentials at rest. Plaintext is stored
    /// when `None`.
    pub encryptor: Option<Arc<dyn Encryptor>>,
    pub slice_reader: Arc<dyn SliceReader>,
}

/// Shared state of the bridge, also held by the lifecycle hooks.
pub(crate) struct BridgeState {
    pub(crate) config: BridgeConfig,
    pub(crate) repo: BridgeRepository,
    pub(crate) locks: Arc<dyn DistributedLock>,
    pub(crate) api: Arc<dyn StorageApiProvider>,
    pub(crate) encryptor: Option<Arc<dyn Encryptor>>,
    pub(crate) slice_reader: Arc<dyn SliceReader>,
    pub(crate) buckets: Deduplicator<EnsuredBucket, StorageApiError>,
}

impl BridgeState {
    /// Client authorized by the caller of the operation, if any.
    pub(crate) fn context_api(&self, ctx: &OperationContext) -> Option<Arc<dyn StorageApi>> {
        ctx.authorization
            .as_ref()
            .map(|auth| self.api.authorized(auth.token()))
    }
}

/// Connects sink files to the remote warehouse tables.
///
/// Registers itself as a lifecycle handler of the [`StorageRepository`] so
/// opening, deleting and deactivating provisions or releases the remote
/// resources in the same atomic operation.
#[derive(Clone)]
pub struct Bridge {
    pub(crate) state: Arc<BridgeState>,
    storage: StorageRepository,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.state.config)
            .field("repository", &self.state.repo)
            .field("encryption", &self.state.encryptor.is_some())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    pub fn new(config: BridgeConfig, deps: BridgeDeps, storage: StorageRepository) -> Self {
        let state = Arc::new(BridgeState {
            config,
            repo: BridgeRepository::new(Arc::clone(storage.store())),
            locks: deps.locks,
            api: deps.api,
            encryptor: deps.encryptor,
            slice_reader: deps.slice_reader,
            buckets: Deduplicator::new(),
        });
        storage
            .hooks()
            .register(Arc::new(BridgeHooks::new(Arc::clone(&state))));
        Self { state, storage }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    pub fn repository(&self) -> &BridgeRepository {
        &self.state.repo
    }

    pub fn storage(&self) -> &StorageRepository {
        &self.storage
    }

    /// Provision the bucket and a fresh token of a re-enabled sink.
    ///
    /// Requires an authorized context. The previous token is revoked once
    /// the new one is stored.
    pub async fn activate_sink(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
    ) -> Result<(), BridgeError> {
        let result = self.try_activate_sink(ctx, sink).await;
        match &result {
            Ok(()) => {
                ctx.rollback.clear();
                info!(sink = %sink.key, "activated sink");
            }
            Err(e) => {
                let failed = ctx.rollback.run().await;
                debug!(sink = %sink.key, error = %e, failed, "sink activation rolled back");
            }
        }
        result
    }

    /// Upload one closed slice to the staging file of its file.
    pub async fn upload_slice(
        &self,
        ctx: &OperationContext,
        key: &SliceKey,
    ) -> Result<Slice, BridgeError> {
        self.state.upload_slice(&self.storage, ctx, key).await
    }

    /// Import a closed file into its table and wait for the load job.
    pub async fn import_file(
        &self,
        ctx: &OperationContext,
        key: &FileKey,
    ) -> Result<File, BridgeError> {
        self.state.import_file(&self.storage, ctx, key).await
    }

    /// Poll a tracked job and drop it once it is finished.
    ///
    /// Returns `true` if the job row was deleted.
    pub async fn check_and_clean_job(
        &self,
        ctx: &OperationContext,
        job: &Job,
    ) -> Result<bool, BridgeError> {
        self.state.check_and_clean_job(ctx, job).await
    }

    /// Encrypt every token still stored in plaintext.
    ///
    /// Returns the number of migrated tokens.
    pub async fn migrate_tokens(&self, ctx: &OperationContext) -> Result<usize, BridgeError> {
        self.state.migrate_tokens(ctx).await
    }

    /// Reload the in-memory job mirror from the store.
    pub async fn load_jobs(&self) -> Result<Vec<Job>, BridgeError> {
        Ok(self.state.repo.load_jobs().await?)
    }

    /// Every job currently stored.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, BridgeError> {
        Ok(self.state.repo.list_jobs().await?)
    }

    async fn try_activate_sink(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
    ) -> Result<(), BridgeError> {
        let Some(table) = sink.table() else {
            return Ok(());
        };
        let Some(api) = self.state.context_api(ctx) else {
            return Err(BridgeError::BadRequest(format!(
                "activation of sink \"{}\" requires an authorized request",
                sink.key
            )));
        };

        let bucket = table.table_id.bucket_id();
        self.state
            .ensure_bucket_exists(ctx, api, sink.key.branch().branch_id, &bucket)
            .await?;

        let mut op = AtomicOp::new();
        self.state.token_for_sink(ctx, sink, &mut op).await?;
        op.commit(self.state.repo.store()).await?;
        Ok(())
    }
}
