use std::sync::Arc;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, DeleteOptions, GetOptions, ResponseHeader, SortOrder, SortTarget,
    Txn as EtcdTxn, TxnOp,
};
use tokio::sync::Mutex;

use sinkbridge_state::error::StateError;
use sinkbridge_state::store::{
    Condition, KeyValue, MetadataStore, Mutation, Txn, TxnResponse,
};

use crate::config::EtcdConfig;

/// etcd-backed implementation of [`MetadataStore`].
///
/// Values are stored verbatim; the store revisions are etcd's own
/// `create_revision` and `mod_revision`, so optimistic writes map directly
/// onto etcd transactions.
pub struct EtcdMetadataStore {
    client: Arc<Mutex<Client>>,
    config: Arc<EtcdConfig>,
}

impl EtcdMetadataStore {
    /// Create a new `EtcdMetadataStore` by connecting to etcd.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if the connection cannot be
    /// established.
    pub async fn new(config: EtcdConfig) -> Result<Self, StateError> {
        let client = Client::connect(
            config.endpoints.clone(),
            Some(etcd_client::ConnectOptions::new().with_timeout(config.connect_timeout)),
        )
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            config: Arc::new(config),
        })
    }

    /// Create an `EtcdMetadataStore` from an existing client and config.
    ///
    /// Useful for sharing a client between the store and lock backends.
    pub fn from_client(client: Arc<Mutex<Client>>, config: Arc<EtcdConfig>) -> Self {
        Self { client, config }
    }

    /// Shared client handle, for building a lock on the same connection.
    pub fn client(&self) -> Arc<Mutex<Client>> {
        Arc::clone(&self.client)
    }

    pub fn config(&self) -> Arc<EtcdConfig> {
        Arc::clone(&self.config)
    }

    fn to_key_value(&self, kv: &etcd_client::KeyValue) -> Result<KeyValue, StateError> {
        let key = kv
            .key_str()
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        let value = kv
            .value_str()
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        Ok(KeyValue {
            key: self.config.strip_key(key).to_owned(),
            value: value.to_owned(),
            create_revision: kv.create_revision(),
            mod_revision: kv.mod_revision(),
        })
    }

    fn compare(&self, condition: &Condition) -> Compare {
        match condition {
            Condition::Missing(key) => {
                Compare::create_revision(self.config.render_key(key), CompareOp::Equal, 0)
            }
            Condition::Exists(key) => {
                Compare::create_revision(self.config.render_key(key), CompareOp::Greater, 0)
            }
            Condition::ModRevision { key, revision } => {
                Compare::mod_revision(self.config.render_key(key), CompareOp::Equal, *revision)
            }
        }
    }

    fn op(&self, mutation: &Mutation) -> TxnOp {
        match mutation {
            Mutation::Put { key, value } => {
                TxnOp::put(self.config.render_key(key), value.as_bytes(), None)
            }
            Mutation::Delete { key } => TxnOp::delete(self.config.render_key(key), None),
            Mutation::DeletePrefix { prefix } => TxnOp::delete(
                self.config.render_key(prefix),
                Some(DeleteOptions::new().with_prefix()),
            ),
        }
    }
}

fn header_revision(header: Option<&ResponseHeader>) -> i64 {
    header.map_or(0, ResponseHeader::revision)
}

#[async_trait]
impl MetadataStore for EtcdMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StateError> {
        let etcd_key = self.config.render_key(key);
        let mut client = self.client.lock().await;
        let resp = client
            .get(etcd_key, None)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        resp.kvs()
            .first()
            .map(|kv| self.to_key_value(kv))
            .transpose()
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, StateError> {
        let etcd_prefix = self.config.render_key(prefix);
        let options = GetOptions::new()
            .with_prefix()
            .with_sort(SortTarget::Key, SortOrder::Ascend);

        let mut client = self.client.lock().await;
        let resp = client
            .get(etcd_prefix, Some(options))
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        resp.kvs().iter().map(|kv| self.to_key_value(kv)).collect()
    }

    async fn put(&self, key: &str, value: &str) -> Result<i64, StateError> {
        let etcd_key = self.config.render_key(key);
        let mut client = self.client.lock().await;
        let resp = client
            .put(etcd_key, value, None)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(header_revision(resp.header()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StateError> {
        let etcd_key = self.config.render_key(key);
        let mut client = self.client.lock().await;
        let resp = client
            .delete(etcd_key, None)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(resp.deleted() > 0)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse, StateError> {
        let compares: Vec<Compare> = txn.conditions.iter().map(|c| self.compare(c)).collect();
        let ops: Vec<TxnOp> = txn.mutations.iter().map(|m| self.op(m)).collect();
        let etcd_txn = EtcdTxn::new().when(compares).and_then(ops);

        let mut client = self.client.lock().await;
        let resp = client
            .txn(etcd_txn)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(TxnResponse {
            succeeded: resp.succeeded(),
            revision: header_revision(resp.header()),
        })
    }
}
