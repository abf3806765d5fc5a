//! Removal of finished storage jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sinkbridge_bridge::{Bridge, Job};
use sinkbridge_core::OperationContext;
use sinkbridge_state::Ownership;

use crate::config::JobCleanupConfig;
use crate::error::CleanupError;
use crate::partition::Partitions;
use crate::report::CleanupReport;
use crate::sweep::{run_periodic, sweep};

/// Periodically drops the rows of finished storage jobs owned by this node.
///
/// A cycle is cancelled once more job checks failed than the configured
/// error tolerance; unprocessed jobs wait for the next cycle.
pub struct JobCleanup {
    config: JobCleanupConfig,
    bridge: Bridge,
    ownership: Arc<dyn Ownership>,
}

impl JobCleanup {
    pub fn new(config: JobCleanupConfig, bridge: Bridge, ownership: Arc<dyn Ownership>) -> Self {
        Self {
            config,
            bridge,
            ownership,
        }
    }

    /// Run cycles on the configured interval until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let this = &self;
            run_periodic(
                "jobs",
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
        info!("deleting metadata of success jobs");
        let tolerance = self.config.error_tolerance;
        let mut report = CleanupReport::default();
        let jobs = owned_jobs(&self.bridge, self.ownership.as_ref(), &mut report.errors).await?;

        // Failed ownership checks use up the tolerance of the cycle too.
        let Some(remaining) = tolerance.checked_sub(report.errors.len()) else {
            return Err(CleanupError::ToleranceExceeded {
                errors: report.errors.len(),
                tolerance,
            });
        };

        let outcome = sweep(
            jobs,
            self.config.concurrency,
            Some(remaining),
            stop,
            |job| clean_job(self.bridge.clone(), job, now),
        )
        .await;
        report.jobs_deleted = outcome.done;
        report.skipped = outcome.skipped;
        report.errors.extend(outcome.errors);

        if outcome.cancelled {
            return Err(CleanupError::ToleranceExceeded {
                errors: report.errors.len(),
                tolerance,
            });
        }
        info!("deleted \"{}\" jobs", report.jobs_deleted);
        Ok(report)
    }
}

/// Stored jobs of the projects this node owns.
pub(crate) async fn owned_jobs(
    bridge: &Bridge,
    ownership: &dyn Ownership,
    errors: &mut Vec<CleanupError>,
) -> Result<Vec<Job>, CleanupError> {
    let mut partitions = Partitions::new(ownership);
    let mut owned = Vec::new();
    for job in bridge.list_jobs().await? {
        if partitions.owns(job.sink_key.project_id(), errors).await {
            owned.push(job);
        }
    }
    Ok(owned)
}

pub(crate) async fn clean_job(
    bridge: Bridge,
    job: Job,
    now: DateTime<Utc>,
) -> Result<bool, CleanupError> {
    let ctx = OperationContext::background(now);
    Ok(bridge.check_and_clean_job(&ctx, &job).await?)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use sinkbridge_core::{BranchKey, Column, Sink, SinkKey, SourceKey, TableMapping};
    use sinkbridge_state::StateError;
    use sinkbridge_storage_api::{JobStatus, StorageApiError, paths};

    use super::*;
    use crate::testing::{Harness, NoOwnership, now};

    /// Owns every project except one whose check always fails.
    struct BrokenProject(&'static str);

    #[async_trait]
    impl Ownership for BrokenProject {
        async fn is_owner(&self, partition_key: &str) -> Result<bool, StateError> {
            if partition_key == self.0 {
                return Err(StateError::Connection("lease lost".into()));
            }
            Ok(true)
        }
    }

    fn other_project_sink() -> Sink {
        Sink::keboola_table(
            SinkKey::new(SourceKey::new(BranchKey::new(999, 1), "other-source"), "other-sink"),
            "in.c-other.table",
            TableMapping::new(vec![Column::primary("id")]),
        )
    }

    fn cleanup(h: &Harness, config: JobCleanupConfig) -> JobCleanup {
        JobCleanup::new(config, h.bridge.clone(), h.ownership())
    }

    #[tokio::test]
    async fn finished_jobs_are_deleted() {
        let h = Harness::new().await;
        h.add_job(JobStatus::Success).await;
        h.add_job(JobStatus::Error).await;
        let running = h.add_job(JobStatus::Processing).await;

        let report = cleanup(&h, JobCleanupConfig::default())
            .run_cycle(now(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.jobs_deleted, 2);
        assert!(report.is_clean());
        let left = h.bridge.list_jobs().await.unwrap();
        assert_eq!(left, vec![running]);
    }

    #[tokio::test]
    async fn foreign_projects_are_skipped() {
        let h = Harness::new().await;
        h.add_job(JobStatus::Success).await;

        let report = JobCleanup::new(
            JobCleanupConfig::default(),
            h.bridge.clone(),
            Arc::new(NoOwnership),
        )
        .run_cycle(now(), &CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(report.jobs_deleted, 0);
        assert_eq!(h.bridge.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_within_tolerance_are_reported() {
        let h = Harness::new().await;
        let failing = h.add_job(JobStatus::Success).await;
        h.add_job(JobStatus::Success).await;
        h.api.inject_error(
            format!("GET {}", paths::job(failing.job_id)),
            StorageApiError::Connection("reset".into()),
            1,
        );

        let report = cleanup(&h, JobCleanupConfig::default())
            .run_cycle(now(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.jobs_deleted, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(h.bridge.list_jobs().await.unwrap(), vec![failing]);
    }

    #[tokio::test]
    async fn exceeded_tolerance_cancels_the_cycle() {
        let h = Harness::new().await;
        let mut jobs = Vec::new();
        for _ in 0..4 {
            jobs.push(h.add_job(JobStatus::Success).await);
        }
        for job in &jobs {
            h.api.inject_error(
                format!("GET {}", paths::job(job.job_id)),
                StorageApiError::Connection("reset".into()),
                1,
            );
        }
        h.api.clear_calls();

        let err = cleanup(
            &h,
            JobCleanupConfig {
                concurrency: 1,
                error_tolerance: 1,
                ..JobCleanupConfig::default()
            },
        )
        .run_cycle(now(), &CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            CleanupError::ToleranceExceeded {
                errors: 2,
                tolerance: 1
            }
        ));
        // The remaining jobs were not touched.
        assert_eq!(h.api.calls_matching("GET /v2/storage/jobs/").len(), 2);
        assert_eq!(h.bridge.list_jobs().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn ownership_errors_count_toward_tolerance() {
        let h = Harness::new().await;
        h.add_sink_job(&other_project_sink(), JobStatus::Success).await;
        let failing = h.add_job(JobStatus::Success).await;
        h.add_job(JobStatus::Success).await;
        h.api.inject_error(
            format!("GET {}", paths::job(failing.job_id)),
            StorageApiError::Connection("reset".into()),
            1,
        );

        let err = JobCleanup::new(
            JobCleanupConfig {
                concurrency: 1,
                error_tolerance: 1,
                ..JobCleanupConfig::default()
            },
            h.bridge.clone(),
            Arc::new(BrokenProject("999")),
        )
        .run_cycle(now(), &CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            CleanupError::ToleranceExceeded {
                errors: 2,
                tolerance: 1
            }
        ));
    }

    #[tokio::test]
    async fn ownership_errors_alone_can_cancel_the_cycle() {
        let h = Harness::new().await;
        h.add_sink_job(&other_project_sink(), JobStatus::Success).await;
        h.add_job(JobStatus::Success).await;
        h.api.clear_calls();

        let err = JobCleanup::new(
            JobCleanupConfig {
                error_tolerance: 0,
                ..JobCleanupConfig::default()
            },
            h.bridge.clone(),
            Arc::new(BrokenProject("999")),
        )
        .run_cycle(now(), &CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            CleanupError::ToleranceExceeded {
                errors: 1,
                tolerance: 0
            }
        ));
        assert!(h.api.calls_matching("GET /v2/storage/jobs/").is_empty());
        assert_eq!(h.bridge.list_jobs().await.unwrap().len(), 2);
    }
}
