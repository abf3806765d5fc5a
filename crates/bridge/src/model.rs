//! Rows the bridge keeps in the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sinkbridge_core::{FileKey, SinkKey, TableId};
use sinkbridge_storage_api::{ApiToken, FileId, FileResource, JobId};

/// Storage token of one sink.
///
/// Exactly one of `token` and `encrypted_token` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub sink_key: SinkKey,
    /// Provider-assigned id, readable without decryption.
    pub token_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ApiToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_token: Option<String>,
    /// The sink was deactivated while import jobs still needed the token.
    #[serde(default)]
    pub revoke_pending: bool,
}

impl Token {
    #[must_use]
    pub fn plain(sink_key: SinkKey, token: ApiToken) -> Self {
        Self {
            sink_key,
            token_id: token.id.clone(),
            token: Some(token),
            encrypted_token: None,
            revoke_pending: false,
        }
    }

    #[must_use]
    pub fn encrypted(sink_key: SinkKey, token_id: String, ciphertext: String) -> Self {
        Self {
            sink_key,
            token_id,
            token: None,
            encrypted_token: Some(ciphertext),
            revoke_pending: false,
        }
    }

    /// Whether the row still holds a plaintext secret.
    #[must_use]
    pub fn is_plaintext(&self) -> bool {
        self.token.is_some() && self.encrypted_token.is_none()
    }
}

/// Upload credentials of the staging file of one sink file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingFile {
    pub file_key: FileKey,
    pub sink_key: SinkKey,
    pub table_id: TableId,
    pub columns: Vec<String>,
    pub file_id: FileId,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_credentials: Option<FileResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_credentials: Option<String>,
    pub credentials_expiration: DateTime<Utc>,
    /// Load job of the latest import attempt.
    #[serde(default)]
    pub storage_job_id: Option<JobId>,
    /// Number of load jobs created for the file so far.
    #[serde(default)]
    pub import_attempts: u32,
}

/// Handle of a remote load job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub sink_key: SinkKey,
    pub job_id: JobId,
    pub file_key: FileKey,
    pub created_at: DateTime<Utc>,
}
