//! Client of the remote warehouse Storage API.
//!
//! [`StorageApi`] covers the calls the sink bridge needs: buckets, tables,
//! tokens, staging files, slice uploads, load jobs and events.
//! [`HttpStorageApiProvider`] talks to a real stack, [`MockStorageApi`]
//! records calls in memory for tests.

pub mod api;
pub mod compress;
pub mod error;
pub mod http;
pub mod model;
pub mod retry;
pub mod testing;

pub use api::{METADATA_PROVIDER, SliceBody, StorageApi, StorageApiProvider, paths};
pub use compress::{gunzip, gzip_stream};
pub use error::StorageApiError;
pub use http::{HttpStorageApi, HttpStorageApiBuilder, HttpStorageApiProvider};
pub use model::{
    ApiToken, Bucket, BucketPermission, Event, EventId, EventType, FileId, FileRequest,
    FileResource, JobError, JobId, JobStatus, LoadDataRequest, MetadataEntry, StorageJob, Table,
    TableDefinition, TokenRequest, UploadedSlice,
};
pub use retry::RetryStrategy;
pub use testing::{MockCall, MockStorageApi};
