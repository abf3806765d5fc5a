//! Bridge between sink files and the remote warehouse tables.
//!
//! The [`Bridge`] provisions buckets, tables, tokens and staging files as
//! files are opened, uploads closed slices, imports closed files through
//! remote load jobs and tracks those jobs until they finish. Tokens and
//! upload credentials are encrypted at rest when an encryptor is set.

pub mod bridge;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod file;
mod hooks;
pub mod job;
pub mod model;
pub mod repository;
pub mod table;
pub mod token;
pub mod upload;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeDeps};
pub use config::BridgeConfig;
pub use dedup::Deduplicator;
pub use error::BridgeError;
pub use model::{Job, StagingFile, Token};
pub use repository::{BridgeRepository, job_key, staging_file_key, token_key};
pub use upload::{DirectorySliceReader, MemorySliceReader, SliceContent, SliceReader};
