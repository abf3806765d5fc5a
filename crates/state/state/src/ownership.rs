//! Work partitioning between cooperating nodes.
//!
//! Background sweeps ask [`Ownership::is_owner`] for each partition key and
//! skip the partitions another node is responsible for.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::StateError;

/// Number of ring positions per member.
const VIRTUAL_NODES: usize = 100;

#[async_trait]
pub trait Ownership: Send + Sync {
    /// Whether this node is responsible for `partition_key`.
    async fn is_owner(&self, partition_key: &str) -> Result<bool, StateError>;
}

/// Ownership of a node running alone: it owns every partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNodeOwnership;

#[async_trait]
impl Ownership for SingleNodeOwnership {
    async fn is_owner(&self, _partition_key: &str) -> Result<bool, StateError> {
        Ok(true)
    }
}

/// Consistent-hash ownership over a known member list.
///
/// Ring positions are derived from SHA-256, so every member computes the
/// same owner for a partition without coordinating.
#[derive(Debug)]
pub struct HashRingOwnership {
    node_id: String,
    ring: RwLock<HashRing>,
}

impl HashRingOwnership {
    /// Create the ring for `node_id`; the node is added to `members` if missing.
    pub fn new(
        node_id: impl Into<String>,
        members: impl IntoIterator<Item = String>,
    ) -> Result<Self, StateError> {
        let node_id = node_id.into();
        if node_id.is_empty() {
            return Err(StateError::Configuration("node id must not be empty".into()));
        }
        let ownership = Self {
            node_id: node_id.clone(),
            ring: RwLock::new(HashRing::default()),
        };
        ownership.set_members(members.into_iter().chain(std::iter::once(node_id)));
        Ok(ownership)
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Replace the member list, e.g. after a node joined or left.
    pub fn set_members(&self, members: impl IntoIterator<Item = String>) {
        let mut ring = HashRing::default();
        for member in members {
            ring.add_node(&member);
        }
        *self.ring.write() = ring;
    }

    /// The member responsible for `partition_key`.
    #[must_use]
    pub fn owner_of(&self, partition_key: &str) -> Option<String> {
        self.ring.read().get_node(partition_key)
    }
}

#[async_trait]
impl Ownership for HashRingOwnership {
    async fn is_owner(&self, partition_key: &str) -> Result<bool, StateError> {
        Ok(self.owner_of(partition_key).as_deref() == Some(self.node_id.as_str()))
    }
}

#[derive(Debug, Default)]
struct HashRing {
    ring: BTreeMap<u64, String>,
}

impl HashRing {
    fn add_node(&mut self, node_id: &str) {
        for i in 0..VIRTUAL_NODES {
            let hash = hash_key(&format!("{node_id}:{i}"));
            self.ring.insert(hash, node_id.to_owned());
        }
    }

    fn get_node(&self, key: &str) -> Option<String> {
        let hash = hash_key(key);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node.clone())
    }
}

fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
