use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use sinkbridge_state::error::StateError;
use sinkbridge_state::store::{KeyValue, MetadataStore, Mutation, Txn, TxnResponse};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    create_revision: i64,
    mod_revision: i64,
}

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<String, Entry>,
    revision: i64,
    deleted: Vec<String>,
}

impl Inner {
    fn kv(&self, key: &str) -> Option<KeyValue> {
        self.data.get(key).map(|e| KeyValue {
            key: key.to_owned(),
            value: e.value.clone(),
            create_revision: e.create_revision,
            mod_revision: e.mod_revision,
        })
    }

    fn put(&mut self, key: &str, value: &str, revision: i64) {
        let create_revision = self
            .data
            .get(key)
            .map_or(revision, |existing| existing.create_revision);
        self.data.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                create_revision,
                mod_revision: revision,
            },
        );
    }

    fn delete(&mut self, key: &str) -> bool {
        let existed = self.data.remove(key).is_some();
        if existed {
            self.deleted.push(key.to_owned());
        }
        existed
    }

    fn delete_prefix(&mut self, prefix: &str) {
        let keys: Vec<String> = self
            .data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            self.delete(&key);
        }
    }
}

/// In-memory [`MetadataStore`] with a single store-wide revision counter.
///
/// All operations take one mutex, so transactions are trivially atomic.
/// Deleted keys are recorded so tests can assert how often an entity was
/// removed.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<Inner>,
}

impl MemoryMetadataStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key deleted so far, in deletion order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.inner.lock().deleted.clone()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StateError> {
        Ok(self.inner.lock().kv(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, StateError> {
        let inner = self.inner.lock();
        Ok(inner
            .data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                create_revision: e.create_revision,
                mod_revision: e.mod_revision,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<i64, StateError> {
        let mut inner = self.inner.lock();
        inner.revision += 1;
        let revision = inner.revision;
        inner.put(key, value, revision);
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<bool, StateError> {
        let mut inner = self.inner.lock();
        let existed = inner.delete(key);
        if existed {
            inner.revision += 1;
        }
        Ok(existed)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse, StateError> {
        let mut inner = self.inner.lock();

        let holds = txn
            .conditions
            .iter()
            .all(|c| c.holds(inner.kv(c.key()).as_ref()));
        if !holds {
            return Ok(TxnResponse {
                succeeded: false,
                revision: inner.revision,
            });
        }

        if !txn.mutations.is_empty() {
            inner.revision += 1;
        }
        let revision = inner.revision;
        for mutation in &txn.mutations {
            match mutation {
                Mutation::Put { key, value } => inner.put(key, value, revision),
                Mutation::Delete { key } => {
                    inner.delete(key);
                }
                Mutation::DeletePrefix { prefix } => inner.delete_prefix(prefix),
            }
        }

        Ok(TxnResponse {
            succeeded: true,
            revision,
        })
    }
}
