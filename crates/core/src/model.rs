//! File and slice entities stored in the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::TableMapping;
use crate::key::{FileKey, SliceKey};
use crate::state_machine::{FileState, SliceState};

/// Remote staging location of a file before it is imported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingStorage {
    pub provider: String,
    pub expiration: Option<DateTime<Utc>>,
}

/// Remote destination of an imported file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStorage {
    pub provider: String,
}

/// One remote upload unit of a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub key: FileKey,
    pub state: FileState,
    pub state_changed_at: DateTime<Utc>,
    pub mapping: TableMapping,
    #[serde(default)]
    pub staging_storage: StagingStorage,
    #[serde(default)]
    pub target_storage: TargetStorage,
}

impl File {
    /// A new file in the [`FileState::Writing`] state.
    #[must_use]
    pub fn open(key: FileKey, mapping: TableMapping) -> Self {
        let now = key.opened_at;
        Self {
            key,
            state: FileState::Writing,
            state_changed_at: now,
            mapping,
            staging_storage: StagingStorage::default(),
            target_storage: TargetStorage::default(),
        }
    }

    /// Time elapsed since the last state change, never negative.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.state_changed_at).max(chrono::Duration::zero())
    }
}

/// Local compression of slice bytes on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    #[default]
    Gzip,
}

/// Record and size counters of a slice, or of a whole file when summed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub slices_count: u64,
    pub records_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_record_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_record_at: Option<DateTime<Utc>>,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub staging_size: u64,
}

impl Statistics {
    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.slices_count += other.slices_count;
        self.records_count += other.records_count;
        self.uncompressed_size += other.uncompressed_size;
        self.compressed_size += other.compressed_size;
        self.staging_size += other.staging_size;
        self.first_record_at = match (self.first_record_at, other.first_record_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_record_at = match (self.last_record_at, other.last_record_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// One physical chunk of a file, written by one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub key: SliceKey,
    pub state: SliceState,
    pub state_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub is_empty: bool,
    #[serde(default)]
    pub compression: Compression,
    /// Remote object name, set once the slice is uploaded.
    #[serde(default)]
    pub staging_path: Option<String>,
    #[serde(default)]
    pub statistics: Statistics,
}

impl Slice {
    #[must_use]
    pub fn open(key: SliceKey) -> Self {
        let now = key.opened_at;
        Self {
            key,
            state: SliceState::Writing,
            state_changed_at: now,
            is_empty: false,
            compression: Compression::default(),
            staging_path: None,
            statistics: Statistics {
                slices_count: 1,
                ..Statistics::default()
            },
        }
    }

    /// Name of the slice object inside the sliced staging file.
    #[must_use]
    pub fn staging_name(&self) -> String {
        format!(
            "{}_{}.csv.gz",
            self.key.volume_id,
            self.key.opened_at.format("%Y%m%d%H%M%S%3f")
        )
    }
}
