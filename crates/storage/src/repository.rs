//! Repository of file and slice entities.
//!
//! Every state change is a compare-and-swap: the entity is read together
//! with its store revision, the transition is checked against the state
//! machine, and the write is committed only if the revision still matches.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use sinkbridge_core::{
    File, FileKey, FileState, OperationContext, Sink, SinkKey, Slice, SliceKey, SliceState,
    VolumeId, validate_transition,
};
use sinkbridge_state::{
    AtomicOp, Condition, KeyKind, LockGuard, MetadataStore, StateKey, Versioned, get_json,
    list_json,
};

use crate::error::RepositoryError;
use crate::hooks::HookRegistry;

/// Store key of a file entity.
#[must_use]
pub fn file_state_key(key: &FileKey) -> String {
    StateKey::new(KeyKind::File, key).canonical()
}

/// Store key of a slice entity.
#[must_use]
pub fn slice_state_key(key: &SliceKey) -> String {
    StateKey::new(KeyKind::Slice, key).canonical()
}

/// Store key pointing to the `Writing` file of a sink.
///
/// Every open commits only if the marker is in the state the open observed,
/// so two concurrent opens cannot both leave a `Writing` file behind.
#[must_use]
pub fn active_file_key(sink: &SinkKey) -> String {
    StateKey::new(KeyKind::ActiveFile, sink).canonical()
}

/// File and slice repository over a [`MetadataStore`].
#[derive(Clone)]
pub struct StorageRepository {
    store: Arc<dyn MetadataStore>,
    hooks: Arc<HookRegistry>,
}

impl fmt::Debug for StorageRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRepository")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl StorageRepository {
    pub fn new(store: Arc<dyn MetadataStore>, hooks: Arc<HookRegistry>) -> Self {
        Self { store, hooks }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Registry the lifecycle handlers are added to at wiring time.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    // -- reads -------------------------------------------------------------

    pub async fn get_file(&self, key: &FileKey) -> Result<File, RepositoryError> {
        Ok(self.versioned_file(key).await?.value)
    }

    pub async fn get_slice(&self, key: &SliceKey) -> Result<Slice, RepositoryError> {
        Ok(self.versioned_slice(key).await?.value)
    }

    /// Every file of every sink, ordered by key.
    pub async fn list_files(&self) -> Result<Vec<File>, RepositoryError> {
        Ok(
            list_json::<File>(self.store.as_ref(), &KeyKind::File.prefix())
                .await?
                .into_iter()
                .map(|v| v.value)
                .collect(),
        )
    }

    /// Files of one sink, oldest first.
    pub async fn list_sink_files(&self, sink: &SinkKey) -> Result<Vec<File>, RepositoryError> {
        Ok(self
            .versioned_sink_files(sink)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    pub async fn list_file_slices(&self, file: &FileKey) -> Result<Vec<Slice>, RepositoryError> {
        Ok(self
            .versioned_file_slices(file)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    /// The file of the sink in the [`FileState::Writing`] state, if any.
    pub async fn active_file(&self, sink: &SinkKey) -> Result<Option<File>, RepositoryError> {
        Ok(self.versioned_active_file(sink).await?.map(|v| v.value))
    }

    /// Whether no slice of the file holds any data.
    pub async fn is_file_empty(&self, file: &FileKey) -> Result<bool, RepositoryError> {
        Ok(self
            .versioned_file_slices(file)
            .await?
            .iter()
            .all(|s| s.value.is_empty))
    }

    /// Staging names of the uploaded, non-empty slices of the file.
    pub async fn uploaded_slice_names(&self, file: &FileKey) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .versioned_file_slices(file)
            .await?
            .into_iter()
            .filter(|s| s.value.state == SliceState::Uploaded && !s.value.is_empty)
            .map(|s| s.value.staging_name())
            .collect())
    }

    // -- file lifecycle ----------------------------------------------------

    /// Open a new file of the sink with one slice per volume.
    ///
    /// Fails with a conflict if the sink already has a file in the
    /// `Writing` state.
    pub async fn open_file(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        volumes: &[VolumeId],
    ) -> Result<File, RepositoryError> {
        let result = self.try_open_file(ctx, sink, volumes).await;
        let file = settle(ctx, result).await?;
        info!(file = %file.key, "opened file");
        Ok(file)
    }

    /// Close the active file of the sink and open the next one atomically.
    pub async fn rotate_file(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        volumes: &[VolumeId],
    ) -> Result<File, RepositoryError> {
        let result = self.try_rotate_file(ctx, sink, volumes).await;
        let file = settle(ctx, result).await?;
        info!(file = %file.key, "rotated file");
        Ok(file)
    }

    /// Move the file `Writing → Closing` and close its writing slices.
    pub async fn close_file(
        &self,
        ctx: &OperationContext,
        key: &FileKey,
    ) -> Result<File, RepositoryError> {
        let current = self.versioned_file(key).await?;
        let mut op = AtomicOp::new();
        if current.value.state == FileState::Writing {
            op.delete(active_file_key(&key.sink));
        }
        let file = self.close_file_into(ctx, current, &mut op).await?;
        op.commit(self.store.as_ref()).await?;
        Ok(file)
    }

    /// Move the file `Closing → Importing`.
    ///
    /// Every slice of the file must already be uploaded; the slices are
    /// guarded by their revisions so a concurrent change aborts the switch.
    pub async fn switch_to_importing(
        &self,
        ctx: &OperationContext,
        key: &FileKey,
    ) -> Result<File, RepositoryError> {
        let current = self.versioned_file(key).await?;
        let slices = self.versioned_file_slices(key).await?;
        let pending: Vec<String> = slices
            .iter()
            .filter(|s| s.value.state != SliceState::Uploaded)
            .map(|s| s.value.key.to_string())
            .collect();
        if !pending.is_empty() {
            return Err(RepositoryError::Conflict(format!(
                "file \"{key}\" has slices that are not uploaded: {}",
                pending.join(", ")
            )));
        }

        let mut op = AtomicOp::new();
        for slice in &slices {
            op.require_revision(slice.key.clone(), Some(slice.mod_revision));
        }
        let file = transition_file(ctx, current, FileState::Importing, &mut op)?;
        op.commit(self.store.as_ref()).await?;
        Ok(file)
    }

    /// Move the file `Importing → Imported`.
    pub async fn switch_to_imported(
        &self,
        ctx: &OperationContext,
        key: &FileKey,
    ) -> Result<File, RepositoryError> {
        let current = self.versioned_file(key).await?;
        let mut op = AtomicOp::new();
        let file = transition_file(ctx, current, FileState::Imported, &mut op)?;
        op.commit(self.store.as_ref()).await?;
        Ok(file)
    }

    /// Delete the file and all its slices.
    ///
    /// The caller must hold the lock of the file; a lost lock is a conflict.
    pub async fn delete_file(
        &self,
        ctx: &OperationContext,
        key: &FileKey,
        guard: &dyn LockGuard,
    ) -> Result<(), RepositoryError> {
        let result = self.try_delete_file(ctx, key, guard).await;
        settle(ctx, result).await?;
        debug!(file = %key, "deleted file");
        Ok(())
    }

    /// Close the active file of a disabled or deleted sink and notify the
    /// lifecycle handlers.
    pub async fn deactivate_sink(
        &self,
        ctx: &OperationContext,
        sink: &SinkKey,
    ) -> Result<Option<File>, RepositoryError> {
        let result = self.try_deactivate_sink(ctx, sink).await;
        let closed = settle(ctx, result).await?;
        info!(sink = %sink, "deactivated sink");
        Ok(closed)
    }

    // -- slice lifecycle ---------------------------------------------------

    /// Move the slice `Writing → Closing`, recording whether it holds data.
    pub async fn close_slice(
        &self,
        ctx: &OperationContext,
        key: &SliceKey,
        is_empty: bool,
    ) -> Result<Slice, RepositoryError> {
        let current = self.versioned_slice(key).await?;
        let mut op = AtomicOp::new();
        let slice = transition_slice(ctx, current, SliceState::Closing, &mut op, |s| {
            s.is_empty = is_empty;
        })?;
        op.commit(self.store.as_ref()).await?;
        Ok(slice)
    }

    /// Close the slice and open the next slice of the same volume.
    ///
    /// The file must still be writing.
    pub async fn rotate_slice(
        &self,
        ctx: &OperationContext,
        key: &SliceKey,
        is_empty: bool,
    ) -> Result<Slice, RepositoryError> {
        let file = self.versioned_file(&key.file).await?;
        if file.value.state != FileState::Writing {
            return Err(RepositoryError::Conflict(format!(
                "cannot rotate slice \"{key}\": file is {}",
                file.value.state
            )));
        }
        if key.opened_at >= ctx.now {
            return Err(RepositoryError::Conflict(format!(
                "cannot rotate slice \"{key}\": the new slice must be opened later"
            )));
        }

        let current = self.versioned_slice(key).await?;
        let mut op = AtomicOp::new();
        op.require_revision(file.key, Some(file.mod_revision));
        transition_slice(ctx, current, SliceState::Closing, &mut op, |s| {
            s.is_empty = is_empty;
        })?;

        let next = Slice::open(SliceKey::new(
            key.file.clone(),
            key.volume_id.clone(),
            ctx.now,
        ));
        let next_key = slice_state_key(&next.key);
        op.require(Condition::Missing(next_key.clone()))
            .put_json(next_key, &next)?;
        op.commit(self.store.as_ref()).await?;
        Ok(next)
    }

    /// Move the slice `Closing → Uploading`.
    pub async fn switch_to_uploading(
        &self,
        ctx: &OperationContext,
        key: &SliceKey,
    ) -> Result<Slice, RepositoryError> {
        let current = self.versioned_slice(key).await?;
        let mut op = AtomicOp::new();
        let slice = transition_slice(ctx, current, SliceState::Uploading, &mut op, |_| {})?;
        op.commit(self.store.as_ref()).await?;
        Ok(slice)
    }

    /// Move the slice `Uploading → Uploaded`, recording where it was staged.
    pub async fn switch_to_uploaded(
        &self,
        ctx: &OperationContext,
        key: &SliceKey,
        staging_path: String,
        staging_size: u64,
    ) -> Result<Slice, RepositoryError> {
        let current = self.versioned_slice(key).await?;
        let mut op = AtomicOp::new();
        let slice = transition_slice(ctx, current, SliceState::Uploaded, &mut op, |s| {
            s.staging_path = Some(staging_path);
            s.statistics.staging_size = staging_size;
        })?;
        op.commit(self.store.as_ref()).await?;
        Ok(slice)
    }

    // -- internals ---------------------------------------------------------

    async fn try_open_file(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        volumes: &[VolumeId],
    ) -> Result<File, RepositoryError> {
        if let Some(active) = self.versioned_active_file(&sink.key).await? {
            return Err(RepositoryError::Conflict(format!(
                "sink \"{}\" already has an active file \"{}\"",
                sink.key, active.value.key
            )));
        }
        let mut op = AtomicOp::new();
        op.require(Condition::Missing(active_file_key(&sink.key)));
        let file = self.prepare_open(ctx, sink, volumes, &mut op).await?;
        op.commit(self.store.as_ref()).await?;
        Ok(file)
    }

    async fn try_rotate_file(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        volumes: &[VolumeId],
    ) -> Result<File, RepositoryError> {
        let mut op = AtomicOp::new();
        let marker = active_file_key(&sink.key);
        let marker_revision = self.store.get(&marker).await?.map(|kv| kv.mod_revision);
        op.require_revision(marker, marker_revision);
        if let Some(active) = self.versioned_active_file(&sink.key).await? {
            if active.value.key.opened_at >= ctx.now {
                return Err(RepositoryError::Conflict(format!(
                    "cannot rotate file \"{}\": the new file must be opened later",
                    active.value.key
                )));
            }
            self.close_file_into(ctx, active, &mut op).await?;
        }
        let file = self.prepare_open(ctx, sink, volumes, &mut op).await?;
        op.commit(self.store.as_ref()).await?;
        Ok(file)
    }

    async fn try_delete_file(
        &self,
        ctx: &OperationContext,
        key: &FileKey,
        guard: &dyn LockGuard,
    ) -> Result<(), RepositoryError> {
        if !guard.is_held().await? {
            return Err(RepositoryError::Conflict(format!(
                "lock \"{}\" is no longer held",
                guard.name()
            )));
        }
        let current = self.versioned_file(key).await?;
        let mut op = AtomicOp::new();
        if current.value.state == FileState::Writing {
            op.delete(active_file_key(&key.sink));
        }
        self.hooks
            .file_will_delete(ctx, &current.value, &mut op)
            .await?;
        op.require_revision(current.key.clone(), Some(current.mod_revision))
            .delete(current.key)
            .delete_prefix(KeyKind::Slice.prefix_of(key));
        op.commit(self.store.as_ref()).await?;
        Ok(())
    }

    async fn try_deactivate_sink(
        &self,
        ctx: &OperationContext,
        sink: &SinkKey,
    ) -> Result<Option<File>, RepositoryError> {
        let mut op = AtomicOp::new();
        let closed = match self.versioned_active_file(sink).await? {
            Some(active) => {
                op.delete(active_file_key(sink));
                Some(self.close_file_into(ctx, active, &mut op).await?)
            }
            None => None,
        };
        self.hooks.sink_deactivated(ctx, sink, &mut op).await?;
        op.commit(self.store.as_ref()).await?;
        Ok(closed)
    }

    async fn versioned_file(&self, key: &FileKey) -> Result<Versioned<File>, RepositoryError> {
        get_json::<File>(self.store.as_ref(), &file_state_key(key))
            .await?
            .ok_or_else(|| RepositoryError::file_not_found(key))
    }

    async fn versioned_slice(&self, key: &SliceKey) -> Result<Versioned<Slice>, RepositoryError> {
        get_json::<Slice>(self.store.as_ref(), &slice_state_key(key))
            .await?
            .ok_or_else(|| RepositoryError::slice_not_found(key))
    }

    async fn versioned_sink_files(
        &self,
        sink: &SinkKey,
    ) -> Result<Vec<Versioned<File>>, RepositoryError> {
        Ok(list_json(self.store.as_ref(), &KeyKind::File.prefix_of(sink)).await?)
    }

    async fn versioned_file_slices(
        &self,
        file: &FileKey,
    ) -> Result<Vec<Versioned<Slice>>, RepositoryError> {
        Ok(list_json(self.store.as_ref(), &KeyKind::Slice.prefix_of(file)).await?)
    }

    async fn versioned_active_file(
        &self,
        sink: &SinkKey,
    ) -> Result<Option<Versioned<File>>, RepositoryError> {
        Ok(self
            .versioned_sink_files(sink)
            .await?
            .into_iter()
            .find(|f| f.value.state == FileState::Writing))
    }

    async fn prepare_open(
        &self,
        ctx: &OperationContext,
        sink: &Sink,
        volumes: &[VolumeId],
        op: &mut AtomicOp,
    ) -> Result<File, RepositoryError> {
        let key = FileKey::new(sink.key.clone(), ctx.now);
        let mapping = sink.table().map(|t| t.mapping.clone()).unwrap_or_default();
        let mut file = File::open(key.clone(), mapping);

        self.hooks.file_opened(ctx, sink, &mut file, op).await?;

        let state_key = file_state_key(&key);
        op.require(Condition::Missing(state_key.clone()))
            .put_json(state_key, &file)?
            .put(active_file_key(&sink.key), key.to_string());
        for volume in volumes {
            let slice = Slice::open(SliceKey::new(key.clone(), volume.clone(), ctx.now));
            op.put_json(slice_state_key(&slice.key), &slice)?;
        }
        Ok(file)
    }

    async fn close_file_into(
        &self,
        ctx: &OperationContext,
        current: Versioned<File>,
        op: &mut AtomicOp,
    ) -> Result<File, RepositoryError> {
        let slices = self.versioned_file_slices(&current.value.key).await?;
        let file = transition_file(ctx, current, FileState::Closing, op)?;
        for slice in slices {
            if slice.value.state == SliceState::Writing {
                transition_slice(ctx, slice, SliceState::Closing, op, |_| {})?;
            }
        }
        Ok(file)
    }
}

/// Run the context's compensations if the operation failed, forget them
/// if it succeeded.
async fn settle<T>(
    ctx: &OperationContext,
    result: Result<T, RepositoryError>,
) -> Result<T, RepositoryError> {
    match &result {
        Ok(_) => ctx.rollback.clear(),
        Err(e) if !ctx.rollback.is_empty() => {
            let failed = ctx.rollback.run().await;
            debug!(error = %e, failed, "operation failed, rolled back");
        }
        Err(_) => {}
    }
    result
}

fn transition_file(
    ctx: &OperationContext,
    current: Versioned<File>,
    to: FileState,
    op: &mut AtomicOp,
) -> Result<File, RepositoryError> {
    let mut file = current.value;
    validate_transition(file.state, to)?;
    file.state = to;
    file.state_changed_at = ctx.now;
    op.require_revision(current.key.clone(), Some(current.mod_revision))
        .put_json(current.key, &file)?;
    debug!(file = %file.key, state = %to, "file state changed");
    Ok(file)
}

fn transition_slice(
    ctx: &OperationContext,
    current: Versioned<Slice>,
    to: SliceState,
    op: &mut AtomicOp,
    update: impl FnOnce(&mut Slice),
) -> Result<Slice, RepositoryError> {
    let mut slice = current.value;
    validate_transition(slice.state, to)?;
    slice.state = to;
    slice.state_changed_at = ctx.now;
    update(&mut slice);
    op.require_revision(current.key.clone(), Some(current.mod_revision))
        .put_json(current.key, &slice)?;
    debug!(slice = %slice.key, state = %to, "slice state changed");
    Ok(slice)
}
