//! Multi-party atomic operations.
//!
//! An [`AtomicOp`] is assembled by several collaborators (a repository and
//! the lifecycle hooks it dispatches), then committed as one store
//! transaction. Actions registered with [`AtomicOp::on_commit`] run only
//! after the transaction succeeded.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::StateError;
use crate::store::{Condition, MetadataStore, Mutation, Txn};

type CommitAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
pub struct AtomicOp {
    txn: Txn,
    on_commit: Vec<CommitAction>,
}

impl fmt::Debug for AtomicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicOp")
            .field("txn", &self.txn)
            .field("on_commit", &self.on_commit.len())
            .finish()
    }
}

impl AtomicOp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, condition: Condition) -> &mut Self {
        self.txn.conditions.push(condition);
        self
    }

    /// Require the key to still carry `revision`, or to be missing when
    /// `revision` is `None`.
    pub fn require_revision(&mut self, key: impl Into<String>, revision: Option<i64>) -> &mut Self {
        let key = key.into();
        self.require(match revision {
            Some(revision) => Condition::ModRevision { key, revision },
            None => Condition::Missing(key),
        })
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.txn.mutations.push(Mutation::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn put_json<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<&mut Self, StateError> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.put(key, encoded))
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.txn.mutations.push(Mutation::Delete { key: key.into() });
        self
    }

    pub fn delete_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.txn.mutations.push(Mutation::DeletePrefix {
            prefix: prefix.into(),
        });
        self
    }

    /// Register an action to run after a successful commit.
    pub fn on_commit<F, Fut>(&mut self, action: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_commit.push(Box::new(move || Box::pin(action())));
        self
    }

    /// Move the conditions, writes and commit actions of `other` into `self`.
    pub fn merge(&mut self, other: AtomicOp) -> &mut Self {
        self.txn.conditions.extend(other.txn.conditions);
        self.txn.mutations.extend(other.txn.mutations);
        self.on_commit.extend(other.on_commit);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.txn.mutations.is_empty() && self.on_commit.is_empty()
    }

    #[must_use]
    pub fn txn(&self) -> &Txn {
        &self.txn
    }

    /// Apply the transaction and then run the commit actions.
    ///
    /// Returns the store revision after the commit. If a condition does not
    /// hold, nothing is written and [`StateError::TxnFailed`] names the
    /// conditioned keys.
    pub async fn commit(self, store: &dyn MetadataStore) -> Result<i64, StateError> {
        let keys: Vec<String> = self
            .txn
            .conditions
            .iter()
            .map(|c| c.key().to_owned())
            .collect();

        let revision = if self.txn.mutations.is_empty() && self.txn.conditions.is_empty() {
            0
        } else {
            let resp = store.txn(self.txn).await?;
            if !resp.succeeded {
                return Err(StateError::TxnFailed { keys });
            }
            resp.revision
        };

        for action in self.on_commit {
            action().await;
        }
        Ok(revision)
    }
}
