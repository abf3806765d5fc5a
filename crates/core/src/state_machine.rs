//! Lifecycle state machines of files and slices.
//!
//! Each state lists the states it may move to. Repository transitions check
//! this table before writing, so an unexpected transition surfaces as a
//! [`TransitionError`] instead of silently overwriting the stored state.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A state of an entity with an explicit allowed-transition table.
pub trait LifecycleState: Copy + Eq + fmt::Display + Send + Sync + 'static {
    /// Name of the entity kind, used in error messages.
    const ENTITY: &'static str;

    /// States reachable from `self` in a single step.
    fn allowed_transitions(self) -> &'static [Self];

    fn can_transition_to(self, next: Self) -> bool {
        self.allowed_transitions().contains(&next)
    }

    fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected {entity} state transition from \"{from}\" to \"{to}\"")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

/// Check a single transition against the table of `S`.
pub fn validate_transition<S: LifecycleState>(from: S, to: S) -> Result<(), TransitionError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TransitionError {
            entity: S::ENTITY,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Writing,
    Closing,
    Importing,
    Imported,
}

impl FileState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Writing => "writing",
            Self::Closing => "closing",
            Self::Importing => "importing",
            Self::Imported => "imported",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LifecycleState for FileState {
    const ENTITY: &'static str = "file";

    fn allowed_transitions(self) -> &'static [Self] {
        match self {
            Self::Writing => &[Self::Closing],
            Self::Closing => &[Self::Importing],
            Self::Importing => &[Self::Imported],
            Self::Imported => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceState {
    Writing,
    Closing,
    Uploading,
    Uploaded,
}

impl SliceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Writing => "writing",
            Self::Closing => "closing",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
        }
    }
}

impl fmt::Display for SliceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LifecycleState for SliceState {
    const ENTITY: &'static str = "slice";

    fn allowed_transitions(self) -> &'static [Self] {
        match self {
            Self::Writing => &[Self::Closing],
            Self::Closing => &[Self::Uploading],
            Self::Uploading => &[Self::Uploaded],
            Self::Uploaded => &[],
        }
    }
}
