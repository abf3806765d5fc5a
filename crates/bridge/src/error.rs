use thiserror::Error;

use sinkbridge_crypto::CryptoError;
use sinkbridge_state::StateError;
use sinkbridge_storage::RepositoryError;
use sinkbridge_storage_api::StorageApiError;

/// Errors from sink bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The sink definition does not match the remote resources. Never
    /// retried automatically.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("sink token \"{sink}\" not found in the database")]
    TokenNotFound { sink: String },

    #[error("staging file \"{file}\" not found in the database")]
    StagingFileNotFound { file: String },

    #[error("sink \"{sink}\" reached the limit of {limit} running import jobs")]
    JobLimitReached { sink: String, limit: usize },

    #[error("file \"{file}\" import failed {attempts} times, giving up")]
    ImportAttemptsExhausted { file: String, attempts: u32 },

    #[error("cannot read slice \"{slice}\": {message}")]
    SliceRead { slice: String, message: String },

    #[error("storage api error: {0}")]
    Api(#[from] StorageApiError),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl BridgeError {
    /// Whether the operation may succeed when retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retryable(),
            Self::State(e) => {
                e.is_conflict() || matches!(e, StateError::Connection(_) | StateError::Timeout(_))
            }
            Self::Repository(e) => e.is_conflict(),
            Self::JobLimitReached { .. } => true,
            Self::BadRequest(_)
            | Self::TokenNotFound { .. }
            | Self::StagingFileNotFound { .. }
            | Self::ImportAttemptsExhausted { .. }
            | Self::SliceRead { .. }
            | Self::Crypto(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(
            BridgeError::JobLimitReached {
                sink: "1/2/s/k".into(),
                limit: 2
            }
            .is_retryable()
        );
        assert!(!BridgeError::BadRequest("columns".into()).is_retryable());
        assert!(BridgeError::Api(StorageApiError::Connection("reset".into())).is_retryable());
        assert_eq!(
            BridgeError::TokenNotFound {
                sink: "1/2/s/k".into()
            }
            .to_string(),
            "sink token \"1/2/s/k\" not found in the database"
        );
    }
}
