//! JSON-typed access on top of [`MetadataStore`].

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StateError;
use crate::store::{KeyValue, MetadataStore};

/// A decoded value together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub key: String,
    pub value: T,
    pub mod_revision: i64,
}

impl<T: DeserializeOwned> Versioned<T> {
    pub fn decode(kv: KeyValue) -> Result<Self, StateError> {
        let value = serde_json::from_str(&kv.value).map_err(|e| {
            StateError::Serialization(format!("cannot decode value of \"{}\": {e}", kv.key))
        })?;
        Ok(Self {
            key: kv.key,
            value,
            mod_revision: kv.mod_revision,
        })
    }
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn MetadataStore,
    key: &str,
) -> Result<Option<Versioned<T>>, StateError> {
    store.get(key).await?.map(Versioned::decode).transpose()
}

pub async fn list_json<T: DeserializeOwned>(
    store: &dyn MetadataStore,
    prefix: &str,
) -> Result<Vec<Versioned<T>>, StateError> {
    store
        .list(prefix)
        .await?
        .into_iter()
        .map(Versioned::decode)
        .collect()
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String, StateError> {
    Ok(serde_json::to_string(value)?)
}
