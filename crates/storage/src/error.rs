use thiserror::Error;

use sinkbridge_core::TransitionError;
use sinkbridge_state::StateError;

/// Error returned by a lifecycle hook handler.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from file and slice repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The entity changed concurrently or is not in the expected state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("{entity} \"{key}\" not found")]
    NotFound { entity: &'static str, key: String },

    /// A lifecycle hook rejected the operation; nothing was written.
    #[error("lifecycle hook failed: {0}")]
    Hook(HookError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl RepositoryError {
    pub(crate) fn file_not_found(key: impl ToString) -> Self {
        Self::NotFound {
            entity: "file",
            key: key.to_string(),
        }
    }

    pub(crate) fn slice_not_found(key: impl ToString) -> Self {
        Self::NotFound {
            entity: "slice",
            key: key.to_string(),
        }
    }

    /// Whether a retry after re-reading the entity may succeed.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) | Self::Transition(_) => true,
            Self::State(e) => e.is_conflict(),
            Self::NotFound { .. } | Self::Hook(_) => false,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
