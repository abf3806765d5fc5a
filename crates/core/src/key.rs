//! Hierarchical keys of the tenant tree.
//!
//! Every key renders as a `/`-separated path that starts with its parent
//! key, so a key of a higher level is always a prefix of the keys below it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BranchId, ProjectId, SinkId, SourceId, VolumeId};

/// Timestamp format used inside rendered keys.
pub const KEY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Render a timestamp the way it appears inside keys.
#[must_use]
pub fn format_key_timestamp(at: &DateTime<Utc>) -> String {
    at.format(KEY_TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchKey {
    pub project_id: ProjectId,
    pub branch_id: BranchId,
}

impl BranchKey {
    #[must_use]
    pub fn new(project_id: impl Into<ProjectId>, branch_id: impl Into<BranchId>) -> Self {
        Self {
            project_id: project_id.into(),
            branch_id: branch_id.into(),
        }
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.branch_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    #[serde(flatten)]
    pub branch: BranchKey,
    pub source_id: SourceId,
}

impl SourceKey {
    #[must_use]
    pub fn new(branch: BranchKey, source_id: impl Into<SourceId>) -> Self {
        Self {
            branch,
            source_id: source_id.into(),
        }
    }

    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.branch.project_id
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.branch, self.source_id)
    }
}

/// Identity of a sink: `{project}/{branch}/{source}/{sink}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SinkKey {
    #[serde(flatten)]
    pub source: SourceKey,
    pub sink_id: SinkId,
}

impl SinkKey {
    #[must_use]
    pub fn new(source: SourceKey, sink_id: impl Into<SinkId>) -> Self {
        Self {
            source,
            sink_id: sink_id.into(),
        }
    }

    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.source.project_id()
    }

    #[must_use]
    pub fn branch(&self) -> BranchKey {
        self.source.branch
    }
}

impl fmt::Display for SinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.sink_id)
    }
}

/// Identity of a file: the sink key plus the moment the file was opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    #[serde(flatten)]
    pub sink: SinkKey,
    #[serde(rename = "file_opened_at")]
    pub opened_at: DateTime<Utc>,
}

impl FileKey {
    #[must_use]
    pub fn new(sink: SinkKey, opened_at: DateTime<Utc>) -> Self {
        Self { sink, opened_at }
    }

    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.sink.project_id()
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sink, format_key_timestamp(&self.opened_at))
    }
}

/// Identity of a slice: file key, writing volume and slice open time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceKey {
    #[serde(flatten)]
    pub file: FileKey,
    pub volume_id: VolumeId,
    #[serde(rename = "slice_opened_at")]
    pub opened_at: DateTime<Utc>,
}

impl SliceKey {
    #[must_use]
    pub fn new(file: FileKey, volume_id: impl Into<VolumeId>, opened_at: DateTime<Utc>) -> Self {
        Self {
            file,
            volume_id: volume_id.into(),
            opened_at,
        }
    }

    #[must_use]
    pub fn sink(&self) -> &SinkKey {
        &self.file.sink
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.file,
            self.volume_id,
            format_key_timestamp(&self.opened_at)
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sink_key() -> SinkKey {
        SinkKey::new(
            SourceKey::new(BranchKey::new(123, 456), "my-source"),
            "my-sink",
        )
    }

    #[test]
    fn rendered_keys_nest() {
        let opened = Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap();
        let file = FileKey::new(sink_key(), opened);
        let slice = SliceKey::new(file.clone(), "my-volume", opened);

        assert_eq!(sink_key().to_string(), "123/456/my-source/my-sink");
        assert_eq!(
            file.to_string(),
            "123/456/my-source/my-sink/2000-01-01T01:00:00.000Z"
        );
        assert_eq!(
            slice.to_string(),
            "123/456/my-source/my-sink/2000-01-01T01:00:00.000Z/my-volume/2000-01-01T01:00:00.000Z"
        );
        assert!(slice.to_string().starts_with(&file.to_string()));
    }

    #[test]
    fn slice_key_serde_keeps_both_timestamps() {
        let file_opened = Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap();
        let slice_opened = Utc.with_ymd_and_hms(2000, 1, 1, 2, 0, 0).unwrap();
        let slice = SliceKey::new(FileKey::new(sink_key(), file_opened), "v1", slice_opened);

        let json = serde_json::to_value(&slice).unwrap();
        assert_eq!(json["project_id"], 123);
        assert_eq!(json["sink_id"], "my-sink");

        let back: SliceKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, slice);
    }
}
