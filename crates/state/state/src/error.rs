use thiserror::Error;

/// Errors from metadata store, lock and ownership operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction precondition no longer held; the caller may re-read and retry.
    #[error("transaction conflict on keys: {}", keys.join(", "))]
    TxnFailed { keys: Vec<String> },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl StateError {
    /// Whether the error is a failed transaction precondition.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::TxnFailed { .. })
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
