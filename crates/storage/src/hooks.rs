//! Typed lifecycle events dispatched by the repository.
//!
//! Handlers run inside the repository operation that triggered them and
//! may add writes to its [`AtomicOp`]. An error from any handler aborts the
//! operation before anything is written.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use sinkbridge_core::{File, OperationContext, Sink, SinkKey};
use sinkbridge_state::AtomicOp;

use crate::error::{HookError, RepositoryError};

/// Handlers of file and sink lifecycle events.
///
/// Every handler defaults to a no-op.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// A new file of `sink` is about to be written. The handler may modify
    /// the file before it is stored.
    async fn on_file_opened(
        &self,
        _ctx: &OperationContext,
        _sink: &Sink,
        _file: &mut File,
        _op: &mut AtomicOp,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// A file and its slices are about to be deleted.
    async fn on_file_will_delete(
        &self,
        _ctx: &OperationContext,
        _file: &File,
        _op: &mut AtomicOp,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// A sink was disabled or deleted.
    async fn on_sink_deactivated(
        &self,
        _ctx: &OperationContext,
        _sink: &SinkKey,
        _op: &mut AtomicOp,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Registered lifecycle handlers, invoked in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn LifecycleHooks>>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hooks: Arc<dyn LifecycleHooks>) {
        self.hooks.write().push(hooks);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn LifecycleHooks>> {
        self.hooks.read().clone()
    }

    pub(crate) async fn file_opened(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        file: &mut File,
        op: &mut AtomicOp,
    ) -> Result<(), RepositoryError> {
        for hooks in self.snapshot() {
            hooks
                .on_file_opened(ctx, sink, file, op)
                .await
                .map_err(RepositoryError::Hook)?;
        }
        Ok(())
    }

    pub(crate) async fn file_will_delete(
        &self,
        ctx: &OperationContext,
        file: &File,
        op: &mut AtomicOp,
    ) -> Result<(), RepositoryError> {
        for hooks in self.snapshot() {
            hooks
                .on_file_will_delete(ctx, file, op)
                .await
                .map_err(RepositoryError::Hook)?;
        }
        Ok(())
    }

    pub(crate) async fn sink_deactivated(
        &self,
        ctx: &OperationContext,
        sink: &SinkKey,
        op: &mut AtomicOp,
    ) -> Result<(), RepositoryError> {
        for hooks in self.snapshot() {
            hooks
                .on_sink_deactivated(ctx, sink, op)
                .await
                .map_err(RepositoryError::Hook)?;
        }
        Ok(())
    }
}
