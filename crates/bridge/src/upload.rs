//! Upload of closed slices into the staging file.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use sinkbridge_core::{
    Compression, OperationContext, Slice, SliceKey, SliceState, format_key_timestamp,
};
use sinkbridge_storage::StorageRepository;
use sinkbridge_storage_api::{SliceBody, StorageApi, gzip_stream};

use crate::bridge::BridgeState;
use crate::error::BridgeError;
use crate::events::slice_upload_event;

/// Local bytes of a closed slice, streamed.
pub struct SliceContent {
    pub body: SliceBody,
    /// Compression of the bytes in `body`.
    pub compression: Compression,
}

impl std::fmt::Debug for SliceContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceContent")
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl SliceContent {
    /// Body ready for upload, gzipped unless it already is.
    pub fn into_gzip(self) -> SliceBody {
        match self.compression {
            Compression::None => gzip_stream(self.body),
            Compression::Gzip => self.body,
        }
    }
}

/// Source of the local bytes of a closed slice.
#[async_trait]
pub trait SliceReader: Send + Sync {
    async fn read_slice(&self, slice: &Slice) -> Result<SliceContent, BridgeError>;
}

/// Reads slices from the volume directories under one root.
///
/// A slice is stored at `<root>/<volume>/<file key>/<slice opened at>/`
/// as `slice.csv` or, gzipped, `slice.csv.gz`.
#[derive(Debug, Clone)]
pub struct DirectorySliceReader {
    root: PathBuf,
}

impl DirectorySliceReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local path of the slice file.
    pub fn slice_path(&self, slice: &Slice) -> PathBuf {
        let name = match slice.compression {
            Compression::None => "slice.csv",
            Compression::Gzip => "slice.csv.gz",
        };
        self.root
            .join(slice.key.volume_id.as_str())
            .join(slice.key.file.to_string())
            .join(format_key_timestamp(&slice.key.opened_at))
            .join(name)
    }
}

#[async_trait]
impl SliceReader for DirectorySliceReader {
    async fn read_slice(&self, slice: &Slice) -> Result<SliceContent, BridgeError> {
        let path = self.slice_path(slice);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| BridgeError::SliceRead {
                slice: slice.key.to_string(),
                message: format!("{}: {e}", path.display()),
            })?;
        debug!(slice = %slice.key, path = %path.display(), "streaming slice");

        Ok(SliceContent {
            body: ReaderStream::new(file).boxed(),
            compression: slice.compression,
        })
    }
}

/// In-memory uncompressed slice contents keyed by slice key.
#[derive(Debug, Default)]
pub struct MemorySliceReader {
    slices: RwLock<HashMap<SliceKey, Bytes>>,
}

impl MemorySliceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: SliceKey, content: impl Into<Bytes>) {
        self.slices.write().insert(key, content.into());
    }
}

#[async_trait]
impl SliceReader for MemorySliceReader {
    async fn read_slice(&self, slice: &Slice) -> Result<SliceContent, BridgeError> {
        let content = self
            .slices
            .read()
            .get(&slice.key)
            .cloned()
            .ok_or_else(|| BridgeError::SliceRead {
                slice: slice.key.to_string(),
                message: String::from("no content"),
            })?;
        Ok(SliceContent {
            body: stream::iter([Ok::<_, std::io::Error>(content)]).boxed(),
            compression: Compression::None,
        })
    }
}

impl BridgeState {
    pub(crate) async fn upload_slice(
        &self,
        storage: &StorageRepository,
        ctx: &OperationContext,
        key: &SliceKey,
    ) -> Result<Slice, BridgeError> {
        let start = Instant::now();
        let api = self.sink_api(key.sink()).await?;
        let slice = storage.get_slice(key).await?;

        let result = self.try_upload_slice(storage, ctx, api.as_ref(), slice.clone()).await;

        let statistics = result
            .as_ref()
            .map_or(&slice.statistics, |uploaded| &uploaded.statistics);
        let error = result.as_ref().err().map(ToString::to_string);
        let event = slice_upload_event(key.sink(), start.elapsed(), statistics, error.as_deref());
        self.send_event(api.as_ref(), event).await;

        result
    }

    async fn try_upload_slice(
        &self,
        storage: &StorageRepository,
        ctx: &OperationContext,
        api: &dyn StorageApi,
        slice: Slice,
    ) -> Result<Slice, BridgeError> {
        // A retried upload continues from `Uploading`.
        let slice = if slice.state == SliceState::Uploading {
            slice
        } else {
            storage.switch_to_uploading(ctx, &slice.key).await?
        };

        let staging = self.staging_file(&slice.key.file).await?.value;
        let credentials = self.upload_credentials(&staging).await?;
        let name = slice.staging_name();

        let staging_size = if slice.is_empty {
            debug!(slice = %slice.key, "empty slice, skipped upload");
            0
        } else {
            let content = self.slice_reader.read_slice(&slice).await?;
            let uploaded = api
                .upload_slice(&credentials, &name, content.into_gzip())
                .await?;

            let mut names = storage.uploaded_slice_names(&slice.key.file).await?;
            names.push(name.clone());
            names.sort();
            names.dedup();
            api.upload_manifest(&credentials, &names).await?;
            uploaded.staging_size
        };

        let uploaded = storage
            .switch_to_uploaded(ctx, &slice.key, name, staging_size)
            .await?;
        info!(slice = %uploaded.key, staging_size, "uploaded slice");
        Ok(uploaded)
    }
}
