use std::time::Duration;

use sinkbridge_storage_api::RetryStrategy;

/// Configuration of the [`Bridge`](crate::Bridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum number of tracked import jobs per sink.
    pub job_limit: usize,
    /// Upper bound for sending one telemetry event.
    pub event_send_timeout: Duration,
    /// How long job creation waits for the per-sink job lock.
    pub job_lock_timeout: Duration,
    /// Expiration of the per-sink job lock if the holder dies.
    pub job_lock_ttl: Duration,
    /// Maximum number of load jobs created for one file.
    pub max_import_attempts: u32,
    /// How long an import waits for its load job to finish.
    pub job_wait_timeout: Duration,
    /// Delay between polls of a running load job.
    pub job_poll_strategy: RetryStrategy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            job_limit: 2,
            event_send_timeout: Duration::from_secs(30),
            job_lock_timeout: Duration::from_secs(30),
            job_lock_ttl: Duration::from_secs(60),
            max_import_attempts: 5,
            job_wait_timeout: Duration::from_secs(3600),
            job_poll_strategy: RetryStrategy::default(),
        }
    }
}
