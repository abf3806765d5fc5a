//! File and slice repository of the sink pipeline.
//!
//! [`StorageRepository`] owns every file and slice state transition.
//! Collaborators such as the sink bridge observe the lifecycle through
//! [`LifecycleHooks`] registered in the [`HookRegistry`].

pub mod error;
pub mod hooks;
pub mod repository;

pub use error::{HookError, RepositoryError};
pub use hooks::{HookRegistry, LifecycleHooks};
pub use repository::{StorageRepository, active_file_key, file_state_key, slice_state_key};
