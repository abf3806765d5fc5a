//! Import of closed files through remote load jobs.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use sinkbridge_core::{File, FileKey, FileState, OperationContext, Statistics};
use sinkbridge_state::{AtomicOp, Versioned};
use sinkbridge_storage::StorageRepository;
use sinkbridge_storage_api::{JobId, JobStatus, LoadDataRequest, StorageApi};

use crate::bridge::BridgeState;
use crate::error::BridgeError;
use crate::events::file_import_event;
use crate::model::{Job, StagingFile};
use crate::repository::{BridgeRepository, job_key};

/// Progress of the load job recorded for a file by an earlier attempt.
enum PriorJob {
    Succeeded,
    Running(JobId),
    /// No job yet, or the previous one failed or expired.
    Missing,
}

impl BridgeState {
    pub(crate) async fn import_file(
        &self,
        storage: &StorageRepository,
        ctx: &OperationContext,
        key: &FileKey,
    ) -> Result<File, BridgeError> {
        let start = Instant::now();

        let file = storage.get_file(key).await?;
        match file.state {
            FileState::Imported => return Ok(file),
            FileState::Importing => {}
            FileState::Writing | FileState::Closing => {
                storage.switch_to_importing(ctx, key).await?;
            }
        }

        let staging = self.staging_file(key).await?;
        let api = self.sink_api(&key.sink).await?;

        if storage.is_file_empty(key).await? {
            info!(file = %key, "empty file, skipped import, deleting empty staging file");
            let branch = key.sink.branch().branch_id;
            if let Err(e) = api.delete_file(branch, staging.value.file_id).await {
                warn!(file = %key, error = %e, "cannot delete empty staging file");
            }
            return Ok(storage.switch_to_imported(ctx, key).await?);
        }

        let mut statistics = Statistics::default();
        for slice in storage.list_file_slices(key).await? {
            statistics.merge(&slice.statistics);
        }

        let result = self.run_import(storage, ctx, &api, staging).await;

        let error = result.as_ref().err().map(ToString::to_string);
        let event = file_import_event(&key.sink, start.elapsed(), &statistics, error.as_deref());
        self.send_event(api.as_ref(), event).await;

        result
    }

    async fn run_import(
        &self,
        storage: &StorageRepository,
        ctx: &OperationContext,
        api: &Arc<dyn StorageApi>,
        staging: Versioned<StagingFile>,
    ) -> Result<File, BridgeError> {
        let file_key = staging.value.file_key.clone();

        let job_id = match self.prior_job(api.as_ref(), &staging.value).await? {
            PriorJob::Succeeded => None,
            PriorJob::Running(job_id) => Some(job_id),
            PriorJob::Missing => Some(self.create_job(ctx, api.as_ref(), staging).await?),
        };

        if let Some(job_id) = job_id {
            debug!(file = %file_key, job_id = %job_id, "waiting for storage job");
            api.wait_for_job(
                job_id,
                self.config.job_wait_timeout,
                &self.config.job_poll_strategy,
            )
            .await?;
        }

        let file = storage.switch_to_imported(ctx, &file_key).await?;
        info!(file = %file_key, "imported file");
        Ok(file)
    }

    async fn prior_job(
        &self,
        api: &dyn StorageApi,
        staging: &StagingFile,
    ) -> Result<PriorJob, BridgeError> {
        let Some(job_id) = staging.storage_job_id else {
            return Ok(PriorJob::Missing);
        };
        info!(file = %staging.file_key, job_id = %job_id, "storage job for file already exists");

        match api.get_job(job_id).await {
            Ok(job) => Ok(match job.status {
                JobStatus::Success => PriorJob::Succeeded,
                JobStatus::Waiting | JobStatus::Processing => PriorJob::Running(job_id),
                JobStatus::Error => PriorJob::Missing,
            }),
            Err(e) if e.is_not_found() => Ok(PriorJob::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Start a load job of the staging file under the sink job lock.
    async fn create_job(
        &self,
        ctx: &OperationContext,
        api: &dyn StorageApi,
        staging: Versioned<StagingFile>,
    ) -> Result<JobId, BridgeError> {
        if staging.value.import_attempts >= self.config.max_import_attempts {
            return Err(BridgeError::ImportAttemptsExhausted {
                file: staging.value.file_key.to_string(),
                attempts: staging.value.import_attempts,
            });
        }

        let lock_name = format!("bridge/job/{}", staging.value.sink_key);
        let guard = self
            .locks
            .lock(
                &lock_name,
                self.config.job_lock_ttl,
                self.config.job_lock_timeout,
            )
            .await?;

        let result = self.create_job_locked(ctx, api, staging).await;

        if let Err(e) = guard.release().await {
            warn!(lock = %lock_name, error = %e, "cannot unlock job lock");
        }
        result
    }

    async fn create_job_locked(
        &self,
        ctx: &OperationContext,
        api: &dyn StorageApi,
        staging: Versioned<StagingFile>,
    ) -> Result<JobId, BridgeError> {
        let sink = staging.value.sink_key.clone();
        let previous = staging.value.storage_job_id;

        let mut running = self.repo.refresh_sink_jobs(&sink).await?;
        if previous.is_some_and(|id| self.repo.is_tracked(&sink, id)) {
            running -= 1;
        }
        if running >= self.config.job_limit {
            return Err(BridgeError::JobLimitReached {
                sink: sink.to_string(),
                limit: self.config.job_limit,
            });
        }

        let request = LoadDataRequest {
            data_file_id: staging.value.file_id,
            incremental: true,
            without_headers: true,
            columns: staging.value.columns.clone(),
        };
        let branch = sink.branch().branch_id;
        let created = api
            .load_data(branch, &staging.value.table_id, &request)
            .await?;

        let mut row = staging.value;
        row.storage_job_id = Some(created.id);
        row.import_attempts += 1;
        let job = Job {
            sink_key: sink.clone(),
            job_id: created.id,
            file_key: row.file_key.clone(),
            created_at: ctx.now,
        };

        let mut op = AtomicOp::new();
        op.require_revision(staging.key.clone(), Some(staging.mod_revision))
            .put_json(staging.key, &row)?;
        if let Some(previous) = previous {
            op.delete(job_key(&sink, previous));
        }
        BridgeRepository::create_job_into(&mut op, &job)?;
        op.commit(self.repo.store()).await?;

        if let Some(previous) = previous {
            self.repo.untrack(&sink, previous);
        }
        self.repo.track(job);
        info!(
            file = %row.file_key,
            job_id = %created.id,
            attempt = row.import_attempts,
            "created storage job"
        );
        Ok(created.id)
    }

    /// Drop the job row once the remote job is finished or gone.
    pub(crate) async fn check_and_clean_job(
        &self,
        _ctx: &OperationContext,
        job: &Job,
    ) -> Result<bool, BridgeError> {
        match self.sink_api(&job.sink_key).await {
            Ok(api) => match api.get_job(job.job_id).await {
                Ok(remote) if !remote.status.is_terminal() => {
                    debug!(job_id = %job.job_id, status = %remote.status, "storage job is still running");
                    return Ok(false);
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            },
            // The token is already revoked, nothing can check the job anymore.
            Err(BridgeError::TokenNotFound { .. }) => {
                debug!(sink = %job.sink_key, job_id = %job.job_id, "sink has no token, dropping job");
            }
            Err(e) => return Err(e),
        }

        let mut op = AtomicOp::new();
        op.delete(job_key(&job.sink_key, job.job_id));
        op.commit(self.repo.store()).await?;
        self.repo.untrack(&job.sink_key, job.job_id);
        info!(sink = %job.sink_key, job_id = %job.job_id, "deleted finished storage job");

        if self.revoke_pending_token(&job.sink_key).await? {
            info!(sink = %job.sink_key, "revoked token of deactivated sink");
        }
        Ok(true)
    }
}
