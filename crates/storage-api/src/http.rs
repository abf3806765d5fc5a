//! `reqwest` implementation of [`StorageApi`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Body, Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use sinkbridge_core::{BranchId, BucketId, TableId};

use crate::api::{METADATA_PROVIDER, SliceBody, StorageApi, StorageApiProvider, paths};
use crate::error::StorageApiError;
use crate::model::{
    ApiToken, Bucket, Event, EventId, FileId, FileRequest, FileResource, JobId, LoadDataRequest,
    Manifest, ManifestEntry, MetadataEntry, StorageJob, Table, TableDefinition, TokenRequest,
    UploadedSlice,
};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Header carrying the storage token.
const TOKEN_HEADER: &str = "X-StorageApi-Token";

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    id: EventId,
}

/// Builder for configuring an [`HttpStorageApiProvider`].
#[derive(Debug)]
pub struct HttpStorageApiBuilder {
    host: String,
    timeout: Duration,
    client: Option<Client>,
}

impl HttpStorageApiBuilder {
    /// Create a new builder for the API at `host` (e.g. `https://connection.keboola.com`).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            client: None,
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a custom reqwest Client.
    #[must_use]
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<HttpStorageApiProvider, StorageApiError> {
        let client = match self.client {
            Some(c) => c,
            None => Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| StorageApiError::Configuration(e.to_string()))?,
        };

        Ok(HttpStorageApiProvider {
            client,
            host: self.host,
        })
    }
}

/// Creates token-authorized HTTP clients sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpStorageApiProvider {
    client: Client,
    host: String,
}

impl HttpStorageApiProvider {
    pub fn builder(host: impl Into<String>) -> HttpStorageApiBuilder {
        HttpStorageApiBuilder::new(host)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn api(&self, token: &str) -> HttpStorageApi {
        HttpStorageApi {
            client: self.client.clone(),
            host: self.host.clone(),
            token: SecretString::new(token.to_owned()),
        }
    }
}

impl StorageApiProvider for HttpStorageApiProvider {
    fn authorized(&self, token: &str) -> Arc<dyn StorageApi> {
        Arc::new(self.api(token))
    }
}

/// Storage API client authorized by one token.
#[derive(Clone)]
pub struct HttpStorageApi {
    client: Client,
    host: String,
    token: SecretString,
}

impl std::fmt::Debug for HttpStorageApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStorageApi")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl HttpStorageApi {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.host, path))
            .header(TOKEN_HEADER, self.token.expose_secret())
    }

    async fn send(req: RequestBuilder) -> Result<Response, StorageApiError> {
        let response = req
            .send()
            .await
            .map_err(|e| StorageApiError::Connection(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(ErrorBody {
                code: Some(code),
                error,
            }) => Err(StorageApiError::Api {
                code,
                message: error.unwrap_or_default(),
                status,
            }),
            _ => Err(StorageApiError::Http {
                status,
                message: text,
            }),
        }
    }

    async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, StorageApiError> {
        Self::send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| StorageApiError::Deserialization(e.to_string()))
    }

    async fn put_object(
        &self,
        file: &FileResource,
        url: &str,
        body: impl Into<Body>,
        content_type: &str,
    ) -> Result<(), StorageApiError> {
        let req = self
            .client
            .put(url)
            .query(&file.upload_params)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        Self::send(req)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                StorageApiError::Connection(msg) => StorageApiError::Upload(msg),
                other => other,
            })
    }
}

#[async_trait]
impl StorageApi for HttpStorageApi {
    async fn get_bucket(
        &self,
        branch: BranchId,
        bucket: &BucketId,
    ) -> Result<Bucket, StorageApiError> {
        Self::send_json(self.request(Method::GET, &paths::bucket(branch, bucket))).await
    }

    async fn create_bucket(
        &self,
        branch: BranchId,
        bucket: &BucketId,
    ) -> Result<Bucket, StorageApiError> {
        let (stage, name) = bucket.stage_and_name();
        let req = self
            .request(Method::POST, &paths::buckets(branch))
            .json(&serde_json::json!({ "stage": stage, "name": name }));
        Self::send_json(req).await
    }

    async fn delete_bucket(
        &self,
        branch: BranchId,
        bucket: &BucketId,
    ) -> Result<(), StorageApiError> {
        Self::send(self.request(Method::DELETE, &paths::bucket(branch, bucket)))
            .await
            .map(|_| ())
    }

    async fn get_table(&self, branch: BranchId, table: &TableId) -> Result<Table, StorageApiError> {
        Self::send_json(self.request(Method::GET, &paths::table(branch, table))).await
    }

    async fn create_table(
        &self,
        branch: BranchId,
        table: &TableId,
        definition: &TableDefinition,
    ) -> Result<Table, StorageApiError> {
        let mut body = serde_json::to_value(definition)
            .map_err(|e| StorageApiError::Deserialization(e.to_string()))?;
        body["name"] = serde_json::Value::from(table.table_name());
        let req = self
            .request(
                Method::POST,
                &paths::table_definition(branch, &table.bucket_id()),
            )
            .json(&body);
        Self::send_json(req).await
    }

    async fn delete_table(&self, branch: BranchId, table: &TableId) -> Result<(), StorageApiError> {
        Self::send(self.request(Method::DELETE, &paths::table(branch, table)))
            .await
            .map(|_| ())
    }

    async fn add_table_metadata(
        &self,
        branch: BranchId,
        table: &TableId,
        entries: &[MetadataEntry],
    ) -> Result<(), StorageApiError> {
        let req = self
            .request(Method::POST, &paths::table_metadata(branch, table))
            .json(&serde_json::json!({ "provider": METADATA_PROVIDER, "metadata": entries }));
        Self::send(req).await.map(|_| ())
    }

    async fn create_token(&self, request: &TokenRequest) -> Result<ApiToken, StorageApiError> {
        Self::send_json(self.request(Method::POST, &paths::tokens()).json(request)).await
    }

    async fn delete_token(&self, token_id: &str) -> Result<(), StorageApiError> {
        Self::send(self.request(Method::DELETE, &paths::token(token_id)))
            .await
            .map(|_| ())
    }

    async fn prepare_file(
        &self,
        branch: BranchId,
        request: &FileRequest,
    ) -> Result<FileResource, StorageApiError> {
        Self::send_json(
            self.request(Method::POST, &paths::file_prepare(branch))
                .json(request),
        )
        .await
    }

    async fn delete_file(&self, branch: BranchId, file_id: FileId) -> Result<(), StorageApiError> {
        Self::send(self.request(Method::DELETE, &paths::file(branch, file_id)))
            .await
            .map(|_| ())
    }

    async fn upload_slice(
        &self,
        file: &FileResource,
        slice_name: &str,
        body: SliceBody,
    ) -> Result<UploadedSlice, StorageApiError> {
        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        let body = body.inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });
        let url = file.slice_url(slice_name);
        self.put_object(file, &url, Body::wrap_stream(body), "application/gzip")
            .await?;
        let staging_size = sent.load(Ordering::Relaxed);
        tracing::debug!(%url, staging_size, "uploaded slice");
        Ok(UploadedSlice { url, staging_size })
    }

    async fn upload_manifest(
        &self,
        file: &FileResource,
        slice_names: &[String],
    ) -> Result<(), StorageApiError> {
        let manifest = Manifest {
            entries: slice_names
                .iter()
                .map(|name| ManifestEntry {
                    url: file.slice_url(name),
                })
                .collect(),
        };
        let body = serde_json::to_vec(&manifest)
            .map_err(|e| StorageApiError::Deserialization(e.to_string()))?;
        self.put_object(file, &file.manifest_url(), body, "application/json")
            .await
    }

    async fn load_data(
        &self,
        branch: BranchId,
        table: &TableId,
        request: &LoadDataRequest,
    ) -> Result<StorageJob, StorageApiError> {
        Self::send_json(
            self.request(Method::POST, &paths::import_async(branch, table))
                .json(request),
        )
        .await
    }

    async fn get_job(&self, job_id: JobId) -> Result<StorageJob, StorageApiError> {
        Self::send_json(self.request(Method::GET, &paths::job(job_id))).await
    }

    async fn create_event(&self, event: &Event) -> Result<EventId, StorageApiError> {
        let response: EventResponse =
            Self::send_json(self.request(Method::POST, &paths::events()).json(event)).await?;
        Ok(response.id)
    }
}
