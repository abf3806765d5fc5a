pub mod context;
pub mod definition;
pub mod key;
pub mod model;
pub mod rollback;
pub mod state_machine;
pub mod types;

pub use context::{ApiAuthorization, OperationContext};
pub use definition::{Column, Sink, SinkTarget, TableMapping, TableSink};
pub use key::{BranchKey, FileKey, SinkKey, SliceKey, SourceKey, format_key_timestamp};
pub use model::{Compression, File, Slice, StagingStorage, Statistics, TargetStorage};
pub use rollback::Rollback;
pub use state_machine::{
    FileState, LifecycleState, SliceState, TransitionError, validate_transition,
};
pub use types::{BranchId, BucketId, ProjectId, SinkId, SourceId, TableId, VolumeId};
