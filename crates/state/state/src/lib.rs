pub mod atomic;
pub mod error;
pub mod key;
pub mod lock;
pub mod ownership;
pub mod store;
pub mod testing;
pub mod typed;

pub use atomic::AtomicOp;
pub use error::StateError;
pub use key::{KeyKind, StateKey};
pub use lock::{DistributedLock, LockGuard};
pub use ownership::{HashRingOwnership, Ownership, SingleNodeOwnership};
pub use store::{Condition, KeyValue, MetadataStore, Mutation, Txn, TxnResponse};
pub use typed::{Versioned, get_json, list_json, to_json};
