//! etcd backend: metadata store with native revisions and lease-based locks.

mod config;
mod lock;
mod store;

pub use config::EtcdConfig;
pub use lock::{EtcdDistributedLock, EtcdLockGuard};
pub use store::EtcdMetadataStore;
