use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use sinkbridge_core::{BranchId, BucketId, TableId};

use crate::error::StorageApiError;
use crate::model::{
    ApiToken, Bucket, Event, EventId, FileId, FileRequest, FileResource, JobId, JobStatus,
    LoadDataRequest, MetadataEntry, StorageJob, Table, TableDefinition, TokenRequest,
    UploadedSlice,
};
use crate::retry::RetryStrategy;

/// Endpoint paths, shared by the HTTP client and the recording mock.
pub mod paths {
    use sinkbridge_core::{BranchId, BucketId, TableId};

    use crate::model::{FileId, JobId};

    pub fn bucket(branch: BranchId, bucket: &BucketId) -> String {
        format!("/v2/storage/branch/{branch}/buckets/{bucket}")
    }

    pub fn buckets(branch: BranchId) -> String {
        format!("/v2/storage/branch/{branch}/buckets")
    }

    pub fn table(branch: BranchId, table: &TableId) -> String {
        format!("/v2/storage/branch/{branch}/tables/{table}")
    }

    pub fn table_definition(branch: BranchId, bucket: &BucketId) -> String {
        format!("/v2/storage/branch/{branch}/buckets/{bucket}/tables-definition")
    }

    pub fn table_metadata(branch: BranchId, table: &TableId) -> String {
        format!("/v2/storage/branch/{branch}/tables/{table}/metadata")
    }

    pub fn tokens() -> String {
        String::from("/v2/storage/tokens")
    }

    pub fn token(id: &str) -> String {
        format!("/v2/storage/tokens/{id}")
    }

    pub fn file_prepare(branch: BranchId) -> String {
        format!("/v2/storage/branch/{branch}/files/prepare")
    }

    pub fn file(branch: BranchId, id: FileId) -> String {
        format!("/v2/storage/branch/{branch}/files/{id}")
    }

    pub fn import_async(branch: BranchId, table: &TableId) -> String {
        format!("/v2/storage/branch/{branch}/tables/{table}/import-async")
    }

    pub fn job(id: JobId) -> String {
        format!("/v2/storage/jobs/{id}")
    }

    pub fn events() -> String {
        String::from("/v2/storage/events")
    }
}

/// Streamed body of a slice upload.
pub type SliceBody = BoxStream<'static, std::io::Result<Bytes>>;

/// Provider assigned to the table metadata written by this service.
pub const METADATA_PROVIDER: &str = "keboola.stream";

/// Operations of the Storage API, authorized by one token.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn get_bucket(&self, branch: BranchId, bucket: &BucketId)
    -> Result<Bucket, StorageApiError>;

    async fn create_bucket(
        &self,
        branch: BranchId,
        bucket: &BucketId,
    ) -> Result<Bucket, StorageApiError>;

    /// Delete an empty bucket.
    async fn delete_bucket(&self, branch: BranchId, bucket: &BucketId)
    -> Result<(), StorageApiError>;

    async fn get_table(&self, branch: BranchId, table: &TableId) -> Result<Table, StorageApiError>;

    async fn create_table(
        &self,
        branch: BranchId,
        table: &TableId,
        definition: &TableDefinition,
    ) -> Result<Table, StorageApiError>;

    async fn delete_table(&self, branch: BranchId, table: &TableId)
    -> Result<(), StorageApiError>;

    async fn add_table_metadata(
        &self,
        branch: BranchId,
        table: &TableId,
        entries: &[MetadataEntry],
    ) -> Result<(), StorageApiError>;

    async fn create_token(&self, request: &TokenRequest) -> Result<ApiToken, StorageApiError>;

    async fn delete_token(&self, token_id: &str) -> Result<(), StorageApiError>;

    async fn prepare_file(
        &self,
        branch: BranchId,
        request: &FileRequest,
    ) -> Result<FileResource, StorageApiError>;

    async fn delete_file(&self, branch: BranchId, file_id: FileId) -> Result<(), StorageApiError>;

    /// Stream the gzipped `body` as one slice of the sliced file.
    ///
    /// The reported staging size is the number of bytes sent.
    async fn upload_slice(
        &self,
        file: &FileResource,
        slice_name: &str,
        body: SliceBody,
    ) -> Result<UploadedSlice, StorageApiError>;

    /// Publish the manifest listing every uploaded slice of the file.
    async fn upload_manifest(
        &self,
        file: &FileResource,
        slice_names: &[String],
    ) -> Result<(), StorageApiError>;

    async fn load_data(
        &self,
        branch: BranchId,
        table: &TableId,
        request: &LoadDataRequest,
    ) -> Result<StorageJob, StorageApiError>;

    async fn get_job(&self, job_id: JobId) -> Result<StorageJob, StorageApiError>;

    async fn create_event(&self, event: &Event) -> Result<EventId, StorageApiError>;

    /// Poll a job until it reaches a terminal status.
    ///
    /// A job finishing with `error` is returned as
    /// [`StorageApiError::JobFailed`].
    async fn wait_for_job(
        &self,
        job_id: JobId,
        timeout: Duration,
        strategy: &RetryStrategy,
    ) -> Result<StorageJob, StorageApiError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempt = 0;

        loop {
            let job = self.get_job(job_id).await?;
            match job.status {
                JobStatus::Success => return Ok(job),
                JobStatus::Error => {
                    let message = job
                        .error
                        .map_or_else(|| String::from("unknown error"), |e| e.message);
                    return Err(StorageApiError::JobFailed { job_id, message });
                }
                JobStatus::Waiting | JobStatus::Processing => {}
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(StorageApiError::JobTimeout(timeout));
            }
            tokio::time::sleep(strategy.delay_for(attempt).min(deadline - now)).await;
            attempt += 1;
        }
    }
}

/// Creates API clients authorized by a given token.
pub trait StorageApiProvider: Send + Sync {
    fn authorized(&self, token: &str) -> Arc<dyn StorageApi>;
}
