//! Periodic cleanup operators of the sink pipeline.
//!
//! [`MetadataCleanup`] deletes expired files together with their slices and
//! staging rows, then drops finished storage jobs. [`JobCleanup`] only drops
//! finished jobs, on its own interval and with an error tolerance. Both
//! partition the work by project through [`Ownership`](sinkbridge_state::Ownership)
//! so each project is cleaned by one node.

pub mod config;
pub mod error;
pub mod jobs;
pub mod metadata;
mod partition;
pub mod report;
mod sweep;

#[cfg(test)]
mod testing;

pub use config::{JobCleanupConfig, MetadataCleanupConfig};
pub use error::CleanupError;
pub use jobs::JobCleanup;
pub use metadata::{MetadataCleanup, file_lock_name};
pub use report::CleanupReport;
