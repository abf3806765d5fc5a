use async_trait::async_trait;

use crate::error::StateError;

/// A stored entry with its store revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Revision at which the key was created.
    pub create_revision: i64,
    /// Revision of the last modification; the token for optimistic writes.
    pub mod_revision: i64,
}

/// A precondition of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The key must not exist.
    Missing(String),
    /// The key must exist.
    Exists(String),
    /// The key must exist and still carry this modification revision.
    ModRevision { key: String, revision: i64 },
}

impl Condition {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Missing(key) | Self::Exists(key) | Self::ModRevision { key, .. } => key,
        }
    }

    /// Evaluate the condition against the current entry of its key.
    #[must_use]
    pub fn holds(&self, current: Option<&KeyValue>) -> bool {
        match self {
            Self::Missing(_) => current.is_none(),
            Self::Exists(_) => current.is_some(),
            Self::ModRevision { revision, .. } => {
                current.is_some_and(|kv| kv.mod_revision == *revision)
            }
        }
    }
}

/// A write applied by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put { key: String, value: String },
    Delete { key: String },
    DeletePrefix { prefix: String },
}

/// Conditions plus writes, applied atomically only if all conditions hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub conditions: Vec<Condition>,
    pub mutations: Vec<Mutation>,
}

impl Txn {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn then(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnResponse {
    pub succeeded: bool,
    /// Store revision after the transaction.
    pub revision: i64,
}

/// Trait for the shared metadata key/value store.
///
/// Keys are plain strings; implementations may add their own namespace
/// prefix. Every write bumps a store-wide revision, and each entry remembers
/// the revision of its last modification.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Get a single entry.
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StateError>;

    /// List every entry whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, StateError>;

    /// Unconditionally write a value. Returns the new modification revision.
    async fn put(&self, key: &str, value: &str) -> Result<i64, StateError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StateError>;

    /// Apply a transaction atomically.
    async fn txn(&self, txn: Txn) -> Result<TxnResponse, StateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(mod_revision: i64) -> KeyValue {
        KeyValue {
            key: "k".into(),
            value: "v".into(),
            create_revision: 1,
            mod_revision,
        }
    }

    #[test]
    fn conditions_evaluate() {
        let current = kv(7);
        assert!(Condition::Missing("k".into()).holds(None));
        assert!(!Condition::Missing("k".into()).holds(Some(&current)));
        assert!(Condition::Exists("k".into()).holds(Some(&current)));
        assert!(!Condition::Exists("k".into()).holds(None));

        let rev = |revision| Condition::ModRevision {
            key: "k".into(),
            revision,
        };
        assert!(rev(7).holds(Some(&current)));
        assert!(!rev(6).holds(Some(&current)));
        assert!(!rev(7).holds(None));
    }

    // Verify object safety.
    fn _assert_dyn_store(_: &dyn MetadataStore) {}
}
