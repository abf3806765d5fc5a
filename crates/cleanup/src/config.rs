use std::time::Duration;

/// Configuration of the [`MetadataCleanup`](crate::MetadataCleanup) operator.
#[derive(Debug, Clone)]
pub struct MetadataCleanupConfig {
    /// How often a cycle starts (default: 30 seconds).
    pub interval: Duration,
    /// Maximum number of entities cleaned in parallel (default: 50).
    pub concurrency: usize,
    /// Age after which a file that was never imported is deleted (default: 7 days).
    pub active_file_expiration: Duration,
    /// Age after which an imported file is deleted (default: 6 hours).
    pub archived_file_expiration: Duration,
    /// Imported files among the newest files of each sink are kept regardless
    /// of their age (default: 1).
    pub archived_file_retention_per_sink: usize,
    /// Upper bound of one cycle (default: 5 minutes).
    pub cycle_timeout: Duration,
}

impl Default for MetadataCleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            concurrency: 50,
            active_file_expiration: Duration::from_secs(7 * 24 * 3600),
            archived_file_expiration: Duration::from_secs(6 * 3600),
            archived_file_retention_per_sink: 1,
            cycle_timeout: Duration::from_secs(300),
        }
    }
}

/// Configuration of the [`JobCleanup`](crate::JobCleanup) operator.
#[derive(Debug, Clone)]
pub struct JobCleanupConfig {
    /// How often a cycle starts (default: 10 seconds).
    pub interval: Duration,
    /// Maximum number of jobs checked in parallel (default: 100).
    pub concurrency: usize,
    /// Failed job checks tolerated before the cycle is cancelled (default: 5).
    pub error_tolerance: usize,
    /// Upper bound of one cycle (default: 5 minutes).
    pub cycle_timeout: Duration,
}

impl Default for JobCleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            concurrency: 100,
            error_tolerance: 5,
            cycle_timeout: Duration::from_secs(300),
        }
    }
}
