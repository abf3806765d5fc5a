//! Bridge wired to in-memory backends for tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use sinkbridge_core::{
    BranchId, BranchKey, Column, File, FileKey, OperationContext, Sink, SinkKey, Slice, SourceKey,
    TableMapping, VolumeId,
};
use sinkbridge_crypto::{
    AesEncryptor, Base64Encryptor, Encryptor, PrefixEncryptor, parse_master_key,
};
use sinkbridge_state::{DistributedLock, LockGuard};
use sinkbridge_state_memory::{MemoryDistributedLock, MemoryMetadataStore};
use sinkbridge_storage::{HookRegistry, StorageRepository};
use sinkbridge_storage_api::MockStorageApi;

use crate::bridge::{Bridge, BridgeDeps, BridgeState};
use crate::config::BridgeConfig;
use crate::upload::MemorySliceReader;

pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap()
}

pub(crate) fn later() -> DateTime<Utc> {
    now() + chrono::Duration::hours(1)
}

pub(crate) fn branch_id() -> BranchId {
    BranchId::new(456)
}

pub(crate) fn sink() -> Sink {
    Sink::keboola_table(
        SinkKey::new(SourceKey::new(BranchKey::new(123, 456), "my-source"), "my-sink"),
        "in.c-bucket.my-table",
        TableMapping::new(vec![Column::primary("id"), Column::new("body")]),
    )
}

fn encryptor() -> Arc<dyn Encryptor> {
    let aes = Arc::new(AesEncryptor::new(parse_master_key(&"42".repeat(32)).unwrap()));
    Arc::new(PrefixEncryptor::new(
        "native::",
        Arc::new(Base64Encryptor::new(aes)),
    ))
}

pub(crate) struct TestBridge {
    pub store: Arc<MemoryMetadataStore>,
    pub locks: MemoryDistributedLock,
    pub api: MockStorageApi,
    pub reader: Arc<MemorySliceReader>,
    pub bridge: Bridge,
    config: BridgeConfig,
}

impl TestBridge {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        Self::build(
            Arc::new(MemoryMetadataStore::new()),
            MemoryDistributedLock::new(),
            MockStorageApi::new(),
            Arc::new(MemorySliceReader::new()),
            config,
            Some(encryptor()),
        )
    }

    pub fn without_encryption() -> Self {
        Self::build(
            Arc::new(MemoryMetadataStore::new()),
            MemoryDistributedLock::new(),
            MockStorageApi::new(),
            Arc::new(MemorySliceReader::new()),
            BridgeConfig::default(),
            None,
        )
    }

    /// A second bridge over the same backends, with encryption enabled.
    pub fn with_encryption(&self) -> Self {
        Self::build(
            Arc::clone(&self.store),
            self.locks.clone(),
            self.api.clone(),
            Arc::clone(&self.reader),
            self.config.clone(),
            Some(encryptor()),
        )
    }

    fn build(
        store: Arc<MemoryMetadataStore>,
        locks: MemoryDistributedLock,
        api: MockStorageApi,
        reader: Arc<MemorySliceReader>,
        config: BridgeConfig,
        encryptor: Option<Arc<dyn Encryptor>>,
    ) -> Self {
        let storage = StorageRepository::new(store.clone(), Arc::new(HookRegistry::new()));
        let deps = BridgeDeps {
            locks: Arc::new(locks.clone()),
            api: Arc::new(api.clone()),
            encryptor,
            slice_reader: reader.clone(),
        };
        let bridge = Bridge::new(config.clone(), deps, storage);
        Self {
            store,
            locks,
            api,
            reader,
            bridge,
            config,
        }
    }

    pub fn state(&self) -> &BridgeState {
        &self.bridge.state
    }

    /// Provision the bucket and token of [`sink`].
    pub async fn activate(&self) {
        self.bridge
            .activate_sink(&OperationContext::authorized(now(), "admin"), &sink())
            .await
            .unwrap();
    }

    pub async fn open_file(&self, volumes: &[VolumeId]) -> File {
        self.open_file_at(now(), volumes).await
    }

    pub async fn open_file_at(&self, at: DateTime<Utc>, volumes: &[VolumeId]) -> File {
        self.bridge
            .storage()
            .open_file(&OperationContext::authorized(at, "admin"), &sink(), volumes)
            .await
            .unwrap()
    }

    /// Close the file and return its closed slices.
    pub async fn close_file(&self, key: &FileKey) -> Vec<Slice> {
        let storage = self.bridge.storage();
        storage
            .close_file(&OperationContext::background(later()), key)
            .await
            .unwrap();
        storage.list_file_slices(key).await.unwrap()
    }

    pub async fn lock_file(&self, key: &FileKey) -> Box<dyn LockGuard> {
        self.locks
            .try_lock(&format!("file/{key}"), Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap()
    }
}
