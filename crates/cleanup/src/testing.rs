use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use sinkbridge_bridge::{Bridge, BridgeConfig, BridgeDeps, Job, MemorySliceReader, job_key};
use sinkbridge_core::{
    BranchKey, Column, File, FileKey, OperationContext, Sink, SinkKey, SourceKey, TableMapping,
    VolumeId,
};
use sinkbridge_state::{AtomicOp, DistributedLock, Ownership, SingleNodeOwnership, StateError};
use sinkbridge_state_memory::{MemoryDistributedLock, MemoryMetadataStore};
use sinkbridge_storage::{HookRegistry, StorageRepository};
use sinkbridge_storage_api::{FileId, JobStatus, LoadDataRequest, MockStorageApi, StorageApi};

pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap()
}

pub(crate) fn sink() -> Sink {
    Sink::keboola_table(
        SinkKey::new(SourceKey::new(BranchKey::new(123, 456), "my-source"), "my-sink"),
        "in.c-bucket.my-table",
        TableMapping::new(vec![Column::primary("id"), Column::new("body")]),
    )
}

/// Ownership of a node owning no project.
pub(crate) struct NoOwnership;

#[async_trait]
impl Ownership for NoOwnership {
    async fn is_owner(&self, _partition_key: &str) -> Result<bool, StateError> {
        Ok(false)
    }
}

pub(crate) struct Harness {
    pub store: Arc<MemoryMetadataStore>,
    pub api: MockStorageApi,
    pub bridge: Bridge,
    locks: Arc<MemoryDistributedLock>,
}

impl Harness {
    /// Bridge over in-memory backends with an activated [`sink`].
    pub async fn new() -> Self {
        let store = Arc::new(MemoryMetadataStore::new());
        let locks = Arc::new(MemoryDistributedLock::new());
        let api = MockStorageApi::new();
        let storage = StorageRepository::new(store.clone(), Arc::new(HookRegistry::new()));
        let deps = BridgeDeps {
            locks: locks.clone(),
            api: Arc::new(api.clone()),
            encryptor: None,
            slice_reader: Arc::new(MemorySliceReader::new()),
        };
        let bridge = Bridge::new(BridgeConfig::default(), deps, storage);
        bridge
            .activate_sink(&OperationContext::authorized(now(), "admin"), &sink())
            .await
            .unwrap();
        Self {
            store,
            api,
            bridge,
            locks,
        }
    }

    pub fn locks(&self) -> Arc<dyn DistributedLock> {
        self.locks.clone()
    }

    pub fn ownership(&self) -> Arc<dyn Ownership> {
        Arc::new(SingleNodeOwnership)
    }

    pub async fn open_file(&self, at: DateTime<Utc>) -> File {
        self.bridge
            .storage()
            .open_file(
                &OperationContext::authorized(at, "admin"),
                &sink(),
                &[VolumeId::new("vol-1")],
            )
            .await
            .unwrap()
    }

    /// A file taken through its whole lifecycle at `at`.
    pub async fn imported_file(&self, at: DateTime<Utc>) -> File {
        let file = self.open_file(at).await;
        let storage = self.bridge.storage();
        let ctx = OperationContext::background(at);
        storage.close_file(&ctx, &file.key).await.unwrap();
        for slice in storage.list_file_slices(&file.key).await.unwrap() {
            storage.switch_to_uploading(&ctx, &slice.key).await.unwrap();
            storage
                .switch_to_uploaded(&ctx, &slice.key, slice.staging_name(), 10)
                .await
                .unwrap();
        }
        storage.switch_to_importing(&ctx, &file.key).await.unwrap();
        storage.switch_to_imported(&ctx, &file.key).await.unwrap()
    }

    /// A remote job of [`sink`] in `status` and its stored row.
    pub async fn add_job(&self, status: JobStatus) -> Job {
        self.add_sink_job(&sink(), status).await
    }

    pub async fn add_sink_job(&self, sink: &Sink, status: JobStatus) -> Job {
        let table = sink.table().unwrap();
        self.api.set_new_job_status(status);
        let remote = self
            .api
            .load_data(
                sink.key.branch().branch_id,
                &table.table_id,
                &LoadDataRequest {
                    data_file_id: FileId::new(1),
                    incremental: true,
                    without_headers: true,
                    columns: table.mapping.column_names(),
                },
            )
            .await
            .unwrap();

        let job = Job {
            sink_key: sink.key.clone(),
            job_id: remote.id,
            file_key: FileKey::new(sink.key.clone(), now()),
            created_at: now(),
        };
        let key = job_key(&job.sink_key, job.job_id);
        let mut op = AtomicOp::new();
        op.put_json(key, &job).unwrap();
        op.commit(self.store.as_ref()).await.unwrap();
        job
    }
}
