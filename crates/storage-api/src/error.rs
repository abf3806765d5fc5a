//! Error types of the Storage API client.

use std::time::Duration;

use thiserror::Error;

use crate::model::JobId;

/// Remote error code of a missing bucket.
pub const BUCKET_NOT_FOUND: &str = "storage.buckets.notFound";
/// Remote error code of a bucket that already exists.
pub const BUCKET_ALREADY_EXISTS: &str = "storage.buckets.alreadyExists";
/// Remote error code of a missing table.
pub const TABLE_NOT_FOUND: &str = "storage.tables.notFound";
/// Remote error code of a table that already exists.
pub const TABLE_ALREADY_EXISTS: &str = "storage.tables.alreadyExists";
/// Remote error code of a missing token.
pub const TOKEN_NOT_FOUND: &str = "storage.tokens.notFound";
/// Remote error code of a missing file resource.
pub const FILE_NOT_FOUND: &str = "storage.files.notFound";
/// Remote error code of a missing storage job.
pub const JOB_NOT_FOUND: &str = "storage.jobs.notFound";

/// Errors that can occur when calling the Storage API.
#[derive(Debug, Clone, Error)]
pub enum StorageApiError {
    /// Connection error (network failure, DNS resolution, etc.).
    #[error("connection error: {0}")]
    Connection(String),

    /// HTTP error without a structured error body.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Error reported by the API with a machine-readable code.
    #[error("{message} [{code}]")]
    Api {
        code: String,
        message: String,
        status: u16,
    },

    /// Streaming a slice or manifest to the staging storage failed.
    #[error("upload error: {0}")]
    Upload(String),

    /// A storage job finished with the `error` status.
    #[error("storage job \"{job_id}\" failed: {message}")]
    JobFailed { job_id: JobId, message: String },

    /// A storage job did not finish in time.
    #[error("timeout after {0:?} while waiting for the storage job")]
    JobTimeout(Duration),

    #[error("failed to deserialize response: {0}")]
    Deserialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StorageApiError {
    /// Build an API error with a remote code.
    pub fn api(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// Returns the API error code if this is an API error.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the error carries the given remote code.
    pub fn has_code(&self, code: &str) -> bool {
        self.api_code() == Some(code)
    }

    /// Whether the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { code, status, .. } => *status == 404 || code.ends_with(".notFound"),
            Self::Http { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Returns `true` if this error is retryable.
    ///
    /// Connection errors and 5xx responses are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Upload(_) | Self::JobTimeout(_) => true,
            Self::Http { status, .. } | Self::Api { status, .. } => *status >= 500,
            Self::JobFailed { .. } | Self::Deserialization(_) | Self::Configuration(_) => false,
        }
    }
}
