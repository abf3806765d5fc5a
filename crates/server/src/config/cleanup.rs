use std::time::Duration;

use serde::Deserialize;
use sinkbridge_cleanup::{JobCleanupConfig, MetadataCleanupConfig};

use super::bridge::check_range;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Configuration of the cleanup operators, the `[cleanup]` table.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupServerConfig {
    #[serde(default)]
    pub metadata: MetadataCleanupServerConfig,
    #[serde(default)]
    pub jobs: JobCleanupServerConfig,
}

impl CleanupServerConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.jobs.validate()
    }
}

/// Removal of expired files, the `[cleanup.metadata]` table.
#[derive(Debug, Deserialize)]
pub struct MetadataCleanupServerConfig {
    /// Whether the operator runs on this node.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How often a cycle starts (seconds).
    #[serde(default = "default_metadata_interval")]
    pub interval_seconds: u64,
    /// Maximum number of entities cleaned in parallel.
    #[serde(default = "default_metadata_concurrency")]
    pub concurrency: usize,
    /// Age after which a file that was never imported is deleted (seconds).
    #[serde(default = "default_active_file_expiration")]
    pub active_file_expiration_seconds: u64,
    /// Age after which an imported file is deleted (seconds).
    #[serde(default = "default_archived_file_expiration")]
    pub archived_file_expiration_seconds: u64,
    /// Newest imported files of each sink kept regardless of their age.
    #[serde(default = "default_archived_file_retention")]
    pub archived_file_retention_per_sink: usize,
    /// Upper bound of one cycle (seconds).
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_seconds: u64,
}

impl Default for MetadataCleanupServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_seconds: default_metadata_interval(),
            concurrency: default_metadata_concurrency(),
            active_file_expiration_seconds: default_active_file_expiration(),
            archived_file_expiration_seconds: default_archived_file_expiration(),
            archived_file_retention_per_sink: default_archived_file_retention(),
            cycle_timeout_seconds: default_cycle_timeout(),
        }
    }
}

impl MetadataCleanupServerConfig {
    fn validate(&self) -> Result<(), String> {
        check_range(
            "cleanup.metadata.interval_seconds",
            self.interval_seconds,
            30,
            DAY,
        )?;
        check_range("cleanup.metadata.concurrency", self.concurrency, 1, 500)?;
        check_range(
            "cleanup.metadata.active_file_expiration_seconds",
            self.active_file_expiration_seconds,
            HOUR,
            30 * DAY,
        )?;
        check_range(
            "cleanup.metadata.archived_file_expiration_seconds",
            self.archived_file_expiration_seconds,
            15 * MINUTE,
            30 * DAY,
        )?;
        check_range(
            "cleanup.metadata.archived_file_retention_per_sink",
            self.archived_file_retention_per_sink,
            0,
            100,
        )?;
        check_range(
            "cleanup.metadata.cycle_timeout_seconds",
            self.cycle_timeout_seconds,
            10,
            HOUR,
        )?;
        if self.active_file_expiration_seconds < self.archived_file_expiration_seconds {
            return Err(format!(
                "cleanup.metadata.active_file_expiration_seconds ({}) must not be shorter than \
                 archived_file_expiration_seconds ({})",
                self.active_file_expiration_seconds, self.archived_file_expiration_seconds
            ));
        }
        Ok(())
    }

    pub fn to_cleanup_config(&self) -> MetadataCleanupConfig {
        MetadataCleanupConfig {
            interval: Duration::from_secs(self.interval_seconds),
            concurrency: self.concurrency,
            active_file_expiration: Duration::from_secs(self.active_file_expiration_seconds),
            archived_file_expiration: Duration::from_secs(self.archived_file_expiration_seconds),
            archived_file_retention_per_sink: self.archived_file_retention_per_sink,
            cycle_timeout: Duration::from_secs(self.cycle_timeout_seconds),
        }
    }
}

/// Removal of finished storage jobs, the `[cleanup.jobs]` table.
#[derive(Debug, Deserialize)]
pub struct JobCleanupServerConfig {
    /// Whether the operator runs on this node.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How often a cycle starts (seconds).
    #[serde(default = "default_jobs_interval")]
    pub interval_seconds: u64,
    /// Maximum number of jobs checked in parallel.
    #[serde(default = "default_jobs_concurrency")]
    pub concurrency: usize,
    /// Failed job checks tolerated before a cycle is cancelled.
    #[serde(default = "default_error_tolerance")]
    pub error_tolerance: usize,
    /// Upper bound of one cycle (seconds).
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_seconds: u64,
}

impl Default for JobCleanupServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_seconds: default_jobs_interval(),
            concurrency: default_jobs_concurrency(),
            error_tolerance: default_error_tolerance(),
            cycle_timeout_seconds: default_cycle_timeout(),
        }
    }
}

impl JobCleanupServerConfig {
    fn validate(&self) -> Result<(), String> {
        check_range("cleanup.jobs.interval_seconds", self.interval_seconds, 5, DAY)?;
        check_range("cleanup.jobs.concurrency", self.concurrency, 1, 500)?;
        check_range("cleanup.jobs.error_tolerance", self.error_tolerance, 0, 1000)?;
        check_range(
            "cleanup.jobs.cycle_timeout_seconds",
            self.cycle_timeout_seconds,
            10,
            HOUR,
        )
    }

    pub fn to_cleanup_config(&self) -> JobCleanupConfig {
        JobCleanupConfig {
            interval: Duration::from_secs(self.interval_seconds),
            concurrency: self.concurrency,
            error_tolerance: self.error_tolerance,
            cycle_timeout: Duration::from_secs(self.cycle_timeout_seconds),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_metadata_interval() -> u64 {
    30
}

fn default_metadata_concurrency() -> usize {
    50
}

fn default_active_file_expiration() -> u64 {
    7 * DAY
}

fn default_archived_file_expiration() -> u64 {
    6 * HOUR
}

fn default_archived_file_retention() -> usize {
    1
}

fn default_cycle_timeout() -> u64 {
    300
}

fn default_jobs_interval() -> u64 {
    10
}

fn default_jobs_concurrency() -> usize {
    100
}

fn default_error_tolerance() -> usize {
    5
}
