//! Token, staging-file and job rows of the bridge.
//!
//! Writes are assembled into [`AtomicOp`]s by the callers; this module only
//! renders keys, reads rows and keeps the in-memory mirror of job handles.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use sinkbridge_core::{FileKey, SinkKey};
use sinkbridge_state::{
    AtomicOp, KeyKind, MetadataStore, StateError, StateKey, Versioned, get_json, list_json,
};
use sinkbridge_storage_api::JobId;

use crate::model::{Job, StagingFile, Token};

#[must_use]
pub fn token_key(sink: &SinkKey) -> String {
    StateKey::new(KeyKind::Token, sink).canonical()
}

#[must_use]
pub fn staging_file_key(file: &FileKey) -> String {
    StateKey::new(KeyKind::StagingFile, file).canonical()
}

#[must_use]
pub fn job_key(sink: &SinkKey, job_id: JobId) -> String {
    StateKey::new(KeyKind::Job, format!("{sink}/{job_id}")).canonical()
}

/// Reads of the bridge rows plus the job mirror.
pub struct BridgeRepository {
    store: Arc<dyn MetadataStore>,
    /// Job handles by store key.
    jobs: DashMap<String, Job>,
}

impl fmt::Debug for BridgeRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeRepository")
            .field("tracked_jobs", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

impl BridgeRepository {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            jobs: DashMap::new(),
        }
    }

    pub fn store(&self) -> &dyn MetadataStore {
        self.store.as_ref()
    }

    // -- tokens ------------------------------------------------------------

    pub async fn get_token(&self, sink: &SinkKey) -> Result<Option<Versioned<Token>>, StateError> {
        get_json(self.store(), &token_key(sink)).await
    }

    pub async fn list_tokens(&self) -> Result<Vec<Versioned<Token>>, StateError> {
        list_json(self.store(), &KeyKind::Token.prefix()).await
    }

    // -- staging files -----------------------------------------------------

    pub async fn get_staging_file(
        &self,
        file: &FileKey,
    ) -> Result<Option<Versioned<StagingFile>>, StateError> {
        get_json(self.store(), &staging_file_key(file)).await
    }

    /// Staging files of one sink.
    pub async fn list_staging_files(
        &self,
        sink: &SinkKey,
    ) -> Result<Vec<Versioned<StagingFile>>, StateError> {
        list_json(self.store(), &KeyKind::StagingFile.prefix_of(sink)).await
    }

    // -- jobs --------------------------------------------------------------

    /// Every stored job, read from the store.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, StateError> {
        Ok(list_json::<Job>(self.store(), &KeyKind::Job.prefix())
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    /// Stored jobs of one sink, read from the store.
    pub async fn list_sink_jobs(&self, sink: &SinkKey) -> Result<Vec<Job>, StateError> {
        Ok(list_json::<Job>(self.store(), &KeyKind::Job.prefix_of(sink))
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    /// Replace the mirror with the jobs currently stored.
    pub async fn load_jobs(&self) -> Result<Vec<Job>, StateError> {
        let jobs = self.list_jobs().await?;
        self.jobs.clear();
        for job in &jobs {
            self.jobs
                .insert(job_key(&job.sink_key, job.job_id), job.clone());
        }
        Ok(jobs)
    }

    /// Number of mirrored jobs of the sink.
    pub fn tracked_jobs(&self, sink: &SinkKey) -> usize {
        self.jobs.iter().filter(|e| &e.sink_key == sink).count()
    }

    pub fn tracked_job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_tracked(&self, sink: &SinkKey, job_id: JobId) -> bool {
        self.jobs.contains_key(&job_key(sink, job_id))
    }

    /// Replace the mirrored jobs of one sink with the stored ones.
    ///
    /// Picks up jobs created or deleted by other nodes.
    pub async fn refresh_sink_jobs(&self, sink: &SinkKey) -> Result<usize, StateError> {
        let jobs = self.list_sink_jobs(sink).await?;
        self.jobs.retain(|_, job| &job.sink_key != sink);
        let count = jobs.len();
        for job in jobs {
            self.track(job);
        }
        Ok(count)
    }

    pub(crate) fn track(&self, job: Job) {
        self.jobs.insert(job_key(&job.sink_key, job.job_id), job);
    }

    pub(crate) fn untrack(&self, sink: &SinkKey, job_id: JobId) {
        self.jobs.remove(&job_key(sink, job_id));
    }

    /// Add the creation of `job` to `op`.
    pub(crate) fn create_job_into(op: &mut AtomicOp, job: &Job) -> Result<(), StateError> {
        let key = job_key(&job.sink_key, job.job_id);
        op.require_revision(key.clone(), None).put_json(key, job)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use sinkbridge_core::{BranchKey, SourceKey};
    use sinkbridge_state_memory::MemoryMetadataStore;

    use super::*;

    fn sink(id: &str) -> SinkKey {
        SinkKey::new(SourceKey::new(BranchKey::new(123, 456), "my-source"), id)
    }

    fn job(sink_id: &str, id: u64) -> Job {
        let opened = Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap();
        Job {
            sink_key: sink(sink_id),
            job_id: JobId::new(id),
            file_key: FileKey::new(sink(sink_id), opened),
            created_at: opened,
        }
    }

    #[test]
    fn keys_render() {
        assert_eq!(
            token_key(&sink("my-sink")),
            "bridge/secret/token/123/456/my-source/my-sink"
        );
        assert_eq!(
            job_key(&sink("my-sink"), JobId::new(321)),
            "bridge/job/123/456/my-source/my-sink/321"
        );
    }

    #[tokio::test]
    async fn load_jobs_fills_mirror() {
        let store = Arc::new(MemoryMetadataStore::new());
        let repo = BridgeRepository::new(store.clone());

        let mut op = AtomicOp::new();
        BridgeRepository::create_job_into(&mut op, &job("sink-1", 1)).unwrap();
        BridgeRepository::create_job_into(&mut op, &job("sink-1", 2)).unwrap();
        BridgeRepository::create_job_into(&mut op, &job("sink-10", 3)).unwrap();
        op.commit(store.as_ref()).await.unwrap();

        assert_eq!(repo.tracked_job_count(), 0);
        assert_eq!(repo.load_jobs().await.unwrap().len(), 3);
        assert_eq!(repo.tracked_jobs(&sink("sink-1")), 2);
        assert_eq!(repo.tracked_jobs(&sink("sink-10")), 1);
        assert_eq!(repo.list_sink_jobs(&sink("sink-1")).await.unwrap().len(), 2);

        repo.untrack(&sink("sink-1"), JobId::new(1));
        assert_eq!(repo.tracked_jobs(&sink("sink-1")), 1);
        assert!(!repo.is_tracked(&sink("sink-1"), JobId::new(1)));
        assert!(repo.is_tracked(&sink("sink-1"), JobId::new(2)));
    }

    #[tokio::test]
    async fn refresh_picks_up_foreign_jobs() {
        let store = Arc::new(MemoryMetadataStore::new());
        let repo = BridgeRepository::new(store.clone());
        repo.track(job("sink-1", 9));
        repo.track(job("sink-10", 3));

        let mut op = AtomicOp::new();
        BridgeRepository::create_job_into(&mut op, &job("sink-1", 1)).unwrap();
        BridgeRepository::create_job_into(&mut op, &job("sink-1", 2)).unwrap();
        op.commit(store.as_ref()).await.unwrap();

        assert_eq!(repo.refresh_sink_jobs(&sink("sink-1")).await.unwrap(), 2);
        assert!(!repo.is_tracked(&sink("sink-1"), JobId::new(9)));
        assert!(repo.is_tracked(&sink("sink-10"), JobId::new(3)));
        assert_eq!(repo.tracked_job_count(), 3);
    }

    #[tokio::test]
    async fn duplicate_job_is_rejected() {
        let store = Arc::new(MemoryMetadataStore::new());
        let mut op = AtomicOp::new();
        BridgeRepository::create_job_into(&mut op, &job("sink-1", 1)).unwrap();
        op.commit(store.as_ref()).await.unwrap();

        let mut op = AtomicOp::new();
        BridgeRepository::create_job_into(&mut op, &job("sink-1", 1)).unwrap();
        let err = op.commit(store.as_ref()).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
