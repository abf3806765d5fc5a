use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of entity stored under a key.
///
/// Each kind owns one top-level key range, so listing every entity of a kind
/// is a single prefix scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// File entities of the storage layer.
    File,
    /// Slice entities of the storage layer.
    Slice,
    /// Pointer to the single `Writing` file of a sink.
    ActiveFile,
    /// Bridge-issued API tokens, one per sink.
    Token,
    /// Bridge staging-file rows holding upload credentials, one per file.
    StagingFile,
    /// Bridge handles of in-flight remote import jobs.
    Job,
    Custom(String),
}

impl KeyKind {
    /// Return the key path segment of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::File => "storage/file",
            Self::Slice => "storage/slice",
            Self::ActiveFile => "storage/active",
            Self::Token => "bridge/secret/token",
            Self::StagingFile => "bridge/file",
            Self::Job => "bridge/job",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Prefix matching every key of this kind.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}/", self.as_str())
    }

    /// Prefix matching every key of this kind below `parent`.
    ///
    /// The trailing separator keeps `sink-1` from matching `sink-10`.
    #[must_use]
    pub fn prefix_of(&self, parent: &impl fmt::Display) -> String {
        format!("{}/{}/", self.as_str(), parent)
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address entries in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    #[must_use]
    pub fn new(kind: KeyKind, id: impl fmt::Display) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    /// Return a canonical string representation: `kind/id`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.kind, self.id)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_kind_as_str() {
        assert_eq!(KeyKind::File.as_str(), "storage/file");
        assert_eq!(KeyKind::Slice.as_str(), "storage/slice");
        assert_eq!(KeyKind::ActiveFile.as_str(), "storage/active");
        assert_eq!(KeyKind::Token.as_str(), "bridge/secret/token");
        assert_eq!(KeyKind::StagingFile.as_str(), "bridge/file");
        assert_eq!(KeyKind::Job.as_str(), "bridge/job");
        assert_eq!(KeyKind::Custom("foo".into()).as_str(), "foo");
    }

    #[test]
    fn state_key_canonical() {
        let key = StateKey::new(KeyKind::Job, "1/2/src/sink/321");
        assert_eq!(key.canonical(), "bridge/job/1/2/src/sink/321");
    }

    #[test]
    fn prefixes_end_with_separator() {
        assert_eq!(KeyKind::File.prefix(), "storage/file/");
        assert_eq!(
            KeyKind::Job.prefix_of(&"1/2/src/sink-1"),
            "bridge/job/1/2/src/sink-1/"
        );
        let other = StateKey::new(KeyKind::Job, "1/2/src/sink-10/5").canonical();
        assert!(!other.starts_with(&KeyKind::Job.prefix_of(&"1/2/src/sink-1")));
    }
}
