//! In-memory [`StorageApi`] for tests.
//!
//! Every call is recorded under a `"METHOD /path"` key built from
//! [`paths`], together with the token the client was authorized by.
//! Errors can be injected per key for a number of calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use futures::TryStreamExt;
use parking_lot::Mutex;

use sinkbridge_core::{BranchId, BucketId, TableId};

use crate::api::{SliceBody, StorageApi, StorageApiProvider, paths};
use crate::compress::gunzip;
use crate::error::{
    BUCKET_ALREADY_EXISTS, BUCKET_NOT_FOUND, FILE_NOT_FOUND, JOB_NOT_FOUND, StorageApiError,
    TABLE_ALREADY_EXISTS, TABLE_NOT_FOUND, TOKEN_NOT_FOUND,
};
use crate::model::{
    ApiToken, Bucket, Event, EventId, FileId, FileRequest, FileResource, JobError, JobId,
    JobStatus, LoadDataRequest, MetadataEntry, StorageJob, Table, TableDefinition, TokenRequest,
    UploadedSlice,
};

/// First id assigned to created tokens.
const FIRST_TOKEN_ID: u64 = 1000;

/// One recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub key: String,
    pub token: Option<String>,
}

#[derive(Debug)]
struct InjectedError {
    error: StorageApiError,
    remaining: usize,
}

#[derive(Debug)]
struct MockState {
    calls: Vec<MockCall>,
    errors: HashMap<String, VecDeque<InjectedError>>,
    buckets: BTreeMap<(BranchId, BucketId), Bucket>,
    tables: BTreeMap<(BranchId, TableId), Table>,
    tokens: BTreeMap<String, (ApiToken, TokenRequest)>,
    files: BTreeMap<FileId, FileResource>,
    jobs: BTreeMap<JobId, StorageJob>,
    load_requests: Vec<LoadDataRequest>,
    uploads: BTreeMap<String, Bytes>,
    manifests: BTreeMap<FileId, Vec<String>>,
    events: Vec<Event>,
    new_job_status: JobStatus,
    next_id: u64,
    next_token_id: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            errors: HashMap::new(),
            buckets: BTreeMap::new(),
            tables: BTreeMap::new(),
            tokens: BTreeMap::new(),
            files: BTreeMap::new(),
            jobs: BTreeMap::new(),
            load_requests: Vec::new(),
            uploads: BTreeMap::new(),
            manifests: BTreeMap::new(),
            events: Vec::new(),
            new_job_status: JobStatus::Success,
            next_id: 1,
            next_token_id: FIRST_TOKEN_ID,
        }
    }
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn take_error(&mut self, key: &str) -> Option<StorageApiError> {
        let queue = self.errors.get_mut(key)?;
        let front = queue.front_mut()?;
        let error = front.error.clone();
        front.remaining -= 1;
        if front.remaining == 0 {
            queue.pop_front();
        }
        Some(error)
    }
}

/// Recording in-memory Storage API.
///
/// Clones share state. [`StorageApiProvider::authorized`] returns a handle
/// over the same state that records the given token on each call.
#[derive(Debug, Clone, Default)]
pub struct MockStorageApi {
    state: Arc<Mutex<MockState>>,
    token: Option<String>,
}

impl MockStorageApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `key` (e.g. `"POST /v2/storage/tokens"`).
    pub fn inject_error(&self, key: impl Into<String>, error: StorageApiError, times: usize) {
        if times == 0 {
            return;
        }
        self.state
            .lock()
            .errors
            .entry(key.into())
            .or_default()
            .push_back(InjectedError {
                error,
                remaining: times,
            });
    }

    /// Status assigned to jobs created by subsequent `load_data` calls.
    pub fn set_new_job_status(&self, status: JobStatus) {
        self.state.lock().new_job_status = status;
    }

    /// Change the status of an existing job.
    pub fn set_job_status(&self, job_id: JobId, status: JobStatus, error: Option<JobError>) {
        if let Some(job) = self.state.lock().jobs.get_mut(&job_id) {
            job.status = status;
            job.error = error;
        }
    }

    pub fn add_bucket(&self, branch: BranchId, bucket: &BucketId) {
        self.state.lock().buckets.insert(
            (branch, bucket.clone()),
            Bucket { id: bucket.clone() },
        );
    }

    pub fn add_table(&self, branch: BranchId, table: Table) {
        let mut state = self.state.lock();
        state.buckets.insert(
            (branch, table.id.bucket_id()),
            Bucket {
                id: table.id.bucket_id(),
            },
        );
        state.tables.insert((branch, table.id.clone()), table);
    }

    /// Register an existing token, e.g. one created outside the test.
    pub fn add_token(&self, token: ApiToken) {
        let request = TokenRequest {
            description: token.description.clone(),
            bucket_permissions: BTreeMap::new(),
            can_read_all_file_uploads: false,
        };
        self.state
            .lock()
            .tokens
            .insert(token.id.clone(), (token, request));
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls recorded under `key`.
    pub fn call_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.key == key)
            .count()
    }

    /// Recorded calls whose key starts with `prefix`.
    pub fn calls_matching(&self, prefix: &str) -> Vec<MockCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.key.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn bucket(&self, branch: BranchId, bucket: &BucketId) -> Option<Bucket> {
        self.state
            .lock()
            .buckets
            .get(&(branch, bucket.clone()))
            .cloned()
    }

    pub fn table(&self, branch: BranchId, table: &TableId) -> Option<Table> {
        self.state
            .lock()
            .tables
            .get(&(branch, table.clone()))
            .cloned()
    }

    pub fn token(&self, id: &str) -> Option<ApiToken> {
        self.state.lock().tokens.get(id).map(|(t, _)| t.clone())
    }

    /// The request a token was created with.
    pub fn token_request(&self, id: &str) -> Option<TokenRequest> {
        self.state.lock().tokens.get(id).map(|(_, r)| r.clone())
    }

    pub fn token_ids(&self) -> Vec<String> {
        self.state.lock().tokens.keys().cloned().collect()
    }

    pub fn file(&self, id: FileId) -> Option<FileResource> {
        self.state.lock().files.get(&id).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    pub fn job(&self, id: JobId) -> Option<StorageJob> {
        self.state.lock().jobs.get(&id).cloned()
    }

    pub fn load_requests(&self) -> Vec<LoadDataRequest> {
        self.state.lock().load_requests.clone()
    }

    /// Uncompressed content of an uploaded slice, by URL.
    /// Gzipped bytes uploaded to `url`.
    pub fn upload(&self, url: &str) -> Option<Bytes> {
        self.state.lock().uploads.get(url).cloned()
    }

    /// Uploaded bytes of `url`, decompressed.
    pub fn upload_content(&self, url: &str) -> Option<Bytes> {
        let compressed = self.upload(url)?;
        gunzip(&compressed).ok().map(Bytes::from)
    }

    pub fn manifest(&self, file: FileId) -> Option<Vec<String>> {
        self.state.lock().manifests.get(&file).cloned()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    fn record(&self, state: &mut MockState, key: String) -> Result<(), StorageApiError> {
        let error = state.take_error(&key);
        state.calls.push(MockCall {
            key,
            token: self.token.clone(),
        });
        error.map_or(Ok(()), Err)
    }
}

impl StorageApiProvider for MockStorageApi {
    fn authorized(&self, token: &str) -> Arc<dyn StorageApi> {
        Arc::new(Self {
            state: Arc::clone(&self.state),
            token: Some(token.to_owned()),
        })
    }
}

fn not_found(code: &str, message: String) -> StorageApiError {
    StorageApiError::api(code, message, 404)
}

#[async_trait]
impl StorageApi for MockStorageApi {
    async fn get_bucket(
        &self,
        branch: BranchId,
        bucket: &BucketId,
    ) -> Result<Bucket, StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("GET {}", paths::bucket(branch, bucket)))?;
        state
            .buckets
            .get(&(branch, bucket.clone()))
            .cloned()
            .ok_or_else(|| not_found(BUCKET_NOT_FOUND, format!("Bucket {bucket} not found")))
    }

    async fn create_bucket(
        &self,
        branch: BranchId,
        bucket: &BucketId,
    ) -> Result<Bucket, StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("POST {}", paths::buckets(branch)))?;
        let key = (branch, bucket.clone());
        if state.buckets.contains_key(&key) {
            return Err(StorageApiError::api(
                BUCKET_ALREADY_EXISTS,
                format!("Bucket {bucket} already exists"),
                400,
            ));
        }
        let created = Bucket { id: bucket.clone() };
        state.buckets.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_bucket(
        &self,
        branch: BranchId,
        bucket: &BucketId,
    ) -> Result<(), StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("DELETE {}", paths::bucket(branch, bucket)))?;
        if state.tables.keys().any(|(b, t)| *b == branch && t.bucket_id() == *bucket) {
            return Err(StorageApiError::api(
                "storage.buckets.notEmpty",
                format!("Bucket {bucket} is not empty"),
                400,
            ));
        }
        state
            .buckets
            .remove(&(branch, bucket.clone()))
            .map(|_| ())
            .ok_or_else(|| not_found(BUCKET_NOT_FOUND, format!("Bucket {bucket} not found")))
    }

    async fn get_table(&self, branch: BranchId, table: &TableId) -> Result<Table, StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("GET {}", paths::table(branch, table)))?;
        state
            .tables
            .get(&(branch, table.clone()))
            .cloned()
            .ok_or_else(|| not_found(TABLE_NOT_FOUND, format!("Table {table} not found")))
    }

    async fn create_table(
        &self,
        branch: BranchId,
        table: &TableId,
        definition: &TableDefinition,
    ) -> Result<Table, StorageApiError> {
        let mut state = self.state.lock();
        let bucket = table.bucket_id();
        self.record(
            &mut state,
            format!("POST {}", paths::table_definition(branch, &bucket)),
        )?;
        if !state.buckets.contains_key(&(branch, bucket.clone())) {
            return Err(not_found(
                BUCKET_NOT_FOUND,
                format!("Bucket {bucket} not found"),
            ));
        }
        let key = (branch, table.clone());
        if state.tables.contains_key(&key) {
            return Err(StorageApiError::api(
                TABLE_ALREADY_EXISTS,
                format!("Table {table} already exists"),
                400,
            ));
        }
        let created = Table {
            id: table.clone(),
            columns: definition.columns.iter().map(|c| c.name.clone()).collect(),
            primary_key: definition.primary_keys_names.clone(),
            metadata: Vec::new(),
        };
        state.tables.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_table(&self, branch: BranchId, table: &TableId) -> Result<(), StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("DELETE {}", paths::table(branch, table)))?;
        state
            .tables
            .remove(&(branch, table.clone()))
            .map(|_| ())
            .ok_or_else(|| not_found(TABLE_NOT_FOUND, format!("Table {table} not found")))
    }

    async fn add_table_metadata(
        &self,
        branch: BranchId,
        table: &TableId,
        entries: &[MetadataEntry],
    ) -> Result<(), StorageApiError> {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            format!("POST {}", paths::table_metadata(branch, table)),
        )?;
        let stored = state
            .tables
            .get_mut(&(branch, table.clone()))
            .ok_or_else(|| not_found(TABLE_NOT_FOUND, format!("Table {table} not found")))?;
        for entry in entries {
            match stored.metadata.iter_mut().find(|m| m.key == entry.key) {
                Some(existing) => existing.value.clone_from(&entry.value),
                None => stored.metadata.push(entry.clone()),
            }
        }
        Ok(())
    }

    async fn create_token(&self, request: &TokenRequest) -> Result<ApiToken, StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("POST {}", paths::tokens()))?;
        let id = state.next_token_id;
        state.next_token_id += 1;
        let token = ApiToken {
            id: id.to_string(),
            token: format!("secret-{id}"),
            description: request.description.clone(),
        };
        state
            .tokens
            .insert(token.id.clone(), (token.clone(), request.clone()));
        Ok(token)
    }

    async fn delete_token(&self, token_id: &str) -> Result<(), StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("DELETE {}", paths::token(token_id)))?;
        state
            .tokens
            .remove(token_id)
            .map(|_| ())
            .ok_or_else(|| not_found(TOKEN_NOT_FOUND, format!("Token {token_id} not found")))
    }

    async fn prepare_file(
        &self,
        branch: BranchId,
        request: &FileRequest,
    ) -> Result<FileResource, StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("POST {}", paths::file_prepare(branch)))?;
        let id = FileId::new(state.next_id());
        let now = Utc::now();
        let file = FileResource {
            id,
            name: request.name.clone(),
            url: format!("https://staging.mock/{id}"),
            is_sliced: request.is_sliced,
            tags: request.tags.clone(),
            upload_params: BTreeMap::from([(String::from("signature"), format!("sig-{id}"))]),
            credentials_expiration: now + ChronoDuration::hours(12),
            expiration: Some(now + ChronoDuration::days(15)),
        };
        state.files.insert(id, file.clone());
        Ok(file)
    }

    async fn delete_file(&self, branch: BranchId, file_id: FileId) -> Result<(), StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("DELETE {}", paths::file(branch, file_id)))?;
        state
            .files
            .remove(&file_id)
            .map(|_| ())
            .ok_or_else(|| not_found(FILE_NOT_FOUND, format!("File {file_id} not found")))
    }

    async fn upload_slice(
        &self,
        file: &FileResource,
        slice_name: &str,
        body: SliceBody,
    ) -> Result<UploadedSlice, StorageApiError> {
        let chunks: Vec<Bytes> = body
            .try_collect()
            .await
            .map_err(|e| StorageApiError::Upload(e.to_string()))?;
        let content = Bytes::from(chunks.concat());

        let mut state = self.state.lock();
        let url = file.slice_url(slice_name);
        self.record(&mut state, format!("PUT {url}"))?;
        let staging_size = content.len() as u64;
        state.uploads.insert(url.clone(), content);
        Ok(UploadedSlice { url, staging_size })
    }

    async fn upload_manifest(
        &self,
        file: &FileResource,
        slice_names: &[String],
    ) -> Result<(), StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("PUT {}", file.manifest_url()))?;
        state.manifests.insert(file.id, slice_names.to_vec());
        Ok(())
    }

    async fn load_data(
        &self,
        branch: BranchId,
        table: &TableId,
        request: &LoadDataRequest,
    ) -> Result<StorageJob, StorageApiError> {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            format!("POST {}", paths::import_async(branch, table)),
        )?;
        let id = JobId::new(state.next_id());
        let job = StorageJob {
            id,
            status: state.new_job_status,
            error: None,
        };
        state.load_requests.push(request.clone());
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: JobId) -> Result<StorageJob, StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("GET {}", paths::job(job_id)))?;
        state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| not_found(JOB_NOT_FOUND, format!("Job {job_id} not found")))
    }

    async fn create_event(&self, event: &Event) -> Result<EventId, StorageApiError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("POST {}", paths::events()))?;
        let id = EventId::new(state.next_id());
        state.events.push(event.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::retry::RetryStrategy;

    #[tokio::test]
    async fn records_calls_with_token() {
        let mock = MockStorageApi::new();
        let branch = BranchId::new(456);
        let bucket = BucketId::new("in.c-bucket");

        let api = mock.authorized("my-token");
        assert!(api.get_bucket(branch, &bucket).await.unwrap_err().is_not_found());
        api.create_bucket(branch, &bucket).await.unwrap();
        api.get_bucket(branch, &bucket).await.unwrap();

        let key = format!("GET {}", paths::bucket(branch, &bucket));
        assert_eq!(mock.call_count(&key), 2);
        assert!(
            mock.calls()
                .iter()
                .all(|c| c.token.as_deref() == Some("my-token"))
        );
    }

    #[tokio::test]
    async fn injected_error_is_consumed() {
        let mock = MockStorageApi::new();
        let key = format!("POST {}", paths::tokens());
        mock.inject_error(&key, StorageApiError::Connection("down".into()), 1);

        let request = TokenRequest {
            description: "d".into(),
            bucket_permissions: BTreeMap::new(),
            can_read_all_file_uploads: true,
        };
        assert!(mock.create_token(&request).await.is_err());

        let token = mock.create_token(&request).await.unwrap();
        assert_eq!(token.id, "1000");
        assert_eq!(token.token, "secret-1000");
        assert_eq!(mock.call_count(&key), 2);
    }

    #[tokio::test]
    async fn table_requires_bucket() {
        let mock = MockStorageApi::new();
        let branch = BranchId::new(1);
        let table = TableId::new("in.c-bucket.t");
        let definition = TableDefinition::new(vec!["id".into()], vec!["id".into()]);

        let err = mock.create_table(branch, &table, &definition).await.unwrap_err();
        assert!(err.has_code(BUCKET_NOT_FOUND));

        mock.add_bucket(branch, &table.bucket_id());
        let created = mock.create_table(branch, &table, &definition).await.unwrap();
        assert_eq!(created.columns, vec!["id".to_string()]);

        let err = mock.create_table(branch, &table, &definition).await.unwrap_err();
        assert!(err.has_code(TABLE_ALREADY_EXISTS));
    }

    #[tokio::test]
    async fn bucket_is_deleted_after_its_tables() {
        let mock = MockStorageApi::new();
        let branch = BranchId::new(1);
        let table = TableId::new("in.c-bucket.t");
        let definition = TableDefinition::new(vec!["id".into()], vec![]);
        mock.create_bucket(branch, &table.bucket_id()).await.unwrap();
        mock.create_table(branch, &table, &definition).await.unwrap();

        let err = mock
            .delete_bucket(branch, &table.bucket_id())
            .await
            .unwrap_err();
        assert!(err.has_code("storage.buckets.notEmpty"));

        mock.delete_table(branch, &table).await.unwrap();
        mock.delete_bucket(branch, &table.bucket_id()).await.unwrap();
        assert!(mock.table(branch, &table).is_none());
        assert!(mock.bucket(branch, &table.bucket_id()).is_none());
        assert!(mock.delete_table(branch, &table).await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_job_sees_status_change() {
        let mock = MockStorageApi::new();
        mock.set_new_job_status(JobStatus::Processing);
        let branch = BranchId::new(1);
        let table = TableId::new("in.c-bucket.t");
        let job = mock
            .load_data(
                branch,
                &table,
                &LoadDataRequest {
                    data_file_id: FileId::new(1),
                    incremental: true,
                    without_headers: true,
                    columns: vec![],
                },
            )
            .await
            .unwrap();

        let strategy = RetryStrategy::Constant {
            delay: Duration::from_secs(1),
        };
        let err = mock
            .wait_for_job(job.id, Duration::from_secs(3), &strategy)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageApiError::JobTimeout(_)));

        mock.set_job_status(
            job.id,
            JobStatus::Error,
            Some(JobError {
                code: "err".into(),
                message: "boom".into(),
            }),
        );
        let err = mock
            .wait_for_job(job.id, Duration::from_secs(3), &strategy)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageApiError::JobFailed { ref message, .. } if message == "boom"));
    }
}
