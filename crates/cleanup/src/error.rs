use std::time::Duration;

use thiserror::Error;

use sinkbridge_bridge::BridgeError;
use sinkbridge_state::StateError;
use sinkbridge_storage::RepositoryError;

/// Errors of one cleanup cycle or of a single cleaned entity.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The cycle did not finish in time; unfinished work was cancelled.
    #[error("cleanup cycle timed out after {0:?}")]
    Timeout(Duration),

    /// Too many entities failed; the rest of the cycle was cancelled.
    #[error("cleanup cancelled after {errors} errors, tolerance is {tolerance}")]
    ToleranceExceeded { errors: usize, tolerance: usize },

    /// A cleanup task panicked or was aborted.
    #[error("cleanup task failed: {0}")]
    Task(String),
}
