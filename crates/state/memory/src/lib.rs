//! In-memory backend for single-node deployments and tests.

mod lock;
mod store;

pub use lock::{MemoryDistributedLock, MemoryLockGuard};
pub use store::MemoryMetadataStore;
