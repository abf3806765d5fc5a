//! Removal of expired files and finished storage jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sinkbridge_bridge::Bridge;
use sinkbridge_core::{File, FileKey, FileState, OperationContext, SinkKey};
use sinkbridge_state::{DistributedLock, Ownership};
use sinkbridge_storage::StorageRepository;

use crate::config::MetadataCleanupConfig;
use crate::error::CleanupError;
use crate::jobs::{clean_job, owned_jobs};
use crate::partition::Partitions;
use crate::report::CleanupReport;
use crate::sweep::{run_periodic, sweep};

/// Expiration of the lock held while a file is deleted.
const FILE_LOCK_TTL: Duration = Duration::from_secs(60);

/// Name of the distributed lock guarding the deletion of a file.
pub fn file_lock_name(key: &FileKey) -> String {
    format!("file/{key}")
}

/// Periodically deletes expired files of the projects this node owns, then
/// drops the rows of finished storage jobs.
pub struct MetadataCleanup {
    config: MetadataCleanupConfig,
    bridge: Bridge,
    locks: Arc<dyn DistributedLock>,
    ownership: Arc<dyn Ownership>,
}

impl MetadataCleanup {
    pub fn new(
        config: MetadataCleanupConfig,
        bridge: Bridge,
        locks: Arc<dyn DistributedLock>,
        ownership: Arc<dyn Ownership>,
    ) -> Self {
        Self {
            config,
            bridge,
            locks,
            ownership,
        }
    }

    /// Run cycles on the configured interval until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let this = &self;
            run_periodic(
                "metadata",
                self.config.interval,
                self.config.cycle_timeout,
                shutdown,
                |stop| async move { this.run_cycle(Utc::now(), &stop).await },
            )
            .await;
        })
    }

    /// Run one cycle. Once `stop` is cancelled no new entity is started and
    /// the cycle returns after the started ones finish.
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        stop: &CancellationToken,
    ) -> Result<CleanupReport, CleanupError> {
        let mut report = CleanupReport::default();

        let expired = self.expired_files(now, &mut report.errors).await?;
        let outcome = sweep(expired, self.config.concurrency, None, stop, |file| {
            delete_expired_file(
                self.bridge.storage().clone(),
                Arc::clone(&self.locks),
                file,
                now,
            )
        })
        .await;
        report.files_deleted = outcome.done;
        report.skipped += outcome.skipped;
        report.errors.extend(outcome.errors);
        info!("deleted \"{}\" files", report.files_deleted);

        let jobs = owned_jobs(&self.bridge, self.ownership.as_ref(), &mut report.errors).await?;
        let outcome = sweep(jobs, self.config.concurrency, None, stop, |job| {
            clean_job(self.bridge.clone(), job, now)
        })
        .await;
        report.jobs_deleted = outcome.done;
        report.skipped += outcome.skipped;
        report.errors.extend(outcome.errors);
        info!("deleted \"{}\" jobs", report.jobs_deleted);

        Ok(report)
    }

    /// Owned files past their expiration, minus the retained imported files.
    ///
    /// Retention ranks every file of a sink, newest first; an imported file
    /// ranked below `archived_file_retention_per_sink` is kept.
    async fn expired_files(
        &self,
        now: DateTime<Utc>,
        errors: &mut Vec<CleanupError>,
    ) -> Result<Vec<File>, CleanupError> {
        let mut partitions = Partitions::new(self.ownership.as_ref());
        let mut by_sink: HashMap<SinkKey, Vec<File>> = HashMap::new();

        for file in self.bridge.storage().list_files().await? {
            if partitions.owns(file.key.sink.project_id(), errors).await {
                by_sink.entry(file.key.sink.clone()).or_default().push(file);
            }
        }

        let mut expired = Vec::new();
        for mut files in by_sink.into_values() {
            files.sort_by(|a, b| b.key.opened_at.cmp(&a.key.opened_at));
            for (rank, file) in files.into_iter().enumerate() {
                let is_due = if file.state == FileState::Imported {
                    rank >= self.config.archived_file_retention_per_sink
                        && is_expired(&file, now, self.config.archived_file_expiration)
                } else {
                    is_expired(&file, now, self.config.active_file_expiration)
                };
                if is_due {
                    expired.push(file);
                }
            }
        }
        Ok(expired)
    }
}

fn is_expired(file: &File, now: DateTime<Utc>, expiration: Duration) -> bool {
    file.age(now).to_std().is_ok_and(|age| age >= expiration)
}

async fn delete_expired_file(
    storage: StorageRepository,
    locks: Arc<dyn DistributedLock>,
    file: File,
    now: DateTime<Utc>,
) -> Result<bool, CleanupError> {
    let name = file_lock_name(&file.key);
    let Some(guard) = locks.try_lock(&name, FILE_LOCK_TTL).await? else {
        debug!(file = %file.key, "file is locked, skipped");
        return Ok(false);
    };

    let ctx = OperationContext::background(now);
    let result = storage.delete_file(&ctx, &file.key, guard.as_ref()).await;
    if let Err(e) = guard.release().await {
        warn!(lock = %name, error = %e, "cannot unlock file lock");
    }
    result?;

    debug!(file = %file.key, state = %file.state, age = %file.age(now), "deleted expired file");
    Ok(true)
}
