//! Request and response types of the Storage API.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sinkbridge_core::{BucketId, TableId};

macro_rules! numeric_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(FileId, "Identifier of a remote file resource.");
numeric_id!(JobId, "Identifier of an asynchronous storage job.");
numeric_id!(EventId, "Identifier of a recorded event.");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: TableId,
    pub columns: Vec<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl Table {
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub primary_keys_names: Vec<String>,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    pub fn new(columns: Vec<String>, primary_key: Vec<String>) -> Self {
        Self {
            primary_keys_names: primary_key,
            columns: columns
                .into_iter()
                .map(|name| ColumnDefinition { name })
                .collect(),
        }
    }
}

/// Permission of a token on one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketPermission {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub description: String,
    pub bucket_permissions: BTreeMap<BucketId, BucketPermission>,
    pub can_read_all_file_uploads: bool,
}

/// A storage access token.
///
/// The secret is kept as a plain string so the token can be persisted;
/// [`Debug`] never prints it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiToken {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub description: String,
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    pub name: String,
    pub is_sliced: bool,
    pub tags: Vec<String>,
}

/// A prepared staging file with its upload credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResource {
    pub id: FileId,
    pub name: String,
    /// Base URL the slices and the manifest are uploaded under.
    pub url: String,
    pub is_sliced: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque upload credentials, e.g. a signed URL query.
    #[serde(default)]
    pub upload_params: BTreeMap<String, String>,
    pub credentials_expiration: DateTime<Utc>,
    /// When the staging file is removed by the remote side.
    pub expiration: Option<DateTime<Utc>>,
}

impl FileResource {
    /// URL of one slice of the sliced file.
    pub fn slice_url(&self, slice_name: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), slice_name)
    }

    /// URL of the sliced-file manifest.
    pub fn manifest_url(&self) -> String {
        self.slice_url("manifest")
    }
}

impl fmt::Debug for FileResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileResource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("upload_params", &"[REDACTED]")
            .field("credentials_expiration", &self.credentials_expiration)
            .finish_non_exhaustive()
    }
}

/// Outcome of one slice upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedSlice {
    pub url: String,
    /// Gzipped size of the uploaded object.
    pub staging_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadDataRequest {
    pub data_file_id: FileId,
    pub incremental: bool,
    pub without_headers: bool,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Processing,
    Success,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageJob {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub error: Option<JobError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Info,
    Error,
}

/// A telemetry event recorded in the project's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub component: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Duration in seconds.
    pub duration: f64,
    /// JSON-encoded object of identifiers.
    pub params: String,
    /// JSON-encoded object of results.
    pub results: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_is_redacted() {
        let token = ApiToken {
            id: "1001".into(),
            token: "my-secret".into(),
            description: String::new(),
        };
        assert!(!format!("{token:?}").contains("my-secret"));
    }

    #[test]
    fn slice_and_manifest_urls() {
        let file = FileResource {
            id: FileId::new(1),
            name: "f".into(),
            url: "https://staging.example/1/".into(),
            is_sliced: true,
            tags: vec![],
            upload_params: BTreeMap::new(),
            credentials_expiration: Utc::now(),
            expiration: None,
        };
        assert_eq!(
            file.slice_url("vol_1.csv.gz"),
            "https://staging.example/1/vol_1.csv.gz"
        );
        assert_eq!(file.manifest_url(), "https://staging.example/1/manifest");
    }

    #[test]
    fn job_status_terminal() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Waiting.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn event_serializes_type_field() {
        let event = Event {
            component: "keboola.stream.sliceUpload".into(),
            message: "Slice upload done.".into(),
            kind: EventType::Info,
            duration: 3.0,
            params: "{}".into(),
            results: "{}".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "info");
    }
}
