use std::sync::Arc;

use async_trait::async_trait;

use sinkbridge_core::{File, OperationContext, Sink, SinkKey};
use sinkbridge_state::AtomicOp;
use sinkbridge_storage::{HookError, LifecycleHooks};

use crate::bridge::BridgeState;
use crate::repository::staging_file_key;

/// Lifecycle handlers keeping the remote resources in step with the files.
pub(crate) struct BridgeHooks {
    state: Arc<BridgeState>,
}

impl BridgeHooks {
    pub(crate) fn new(state: Arc<BridgeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl LifecycleHooks for BridgeHooks {
    async fn on_file_opened(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        file: &mut File,
        op: &mut AtomicOp,
    ) -> Result<(), HookError> {
        self.state.setup_file(ctx, sink, file, op).await?;
        Ok(())
    }

    /// The remote staging file is left to expire.
    async fn on_file_will_delete(
        &self,
        _ctx: &OperationContext,
        file: &File,
        op: &mut AtomicOp,
    ) -> Result<(), HookError> {
        op.delete(staging_file_key(&file.key));
        Ok(())
    }

    async fn on_sink_deactivated(
        &self,
        ctx: &OperationContext,
        sink: &SinkKey,
        op: &mut AtomicOp,
    ) -> Result<(), HookError> {
        self.state.release_sink_token(ctx, sink, op).await?;
        Ok(())
    }
}
