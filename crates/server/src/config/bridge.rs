use std::time::Duration;

use serde::Deserialize;
use sinkbridge_bridge::BridgeConfig;

/// Limits of the sink bridge, the `[bridge]` table.
#[derive(Debug, Deserialize)]
pub struct BridgeServerConfig {
    /// Maximum number of tracked import jobs per sink.
    #[serde(default = "default_job_limit")]
    pub job_limit: usize,
    /// Upper bound for sending one telemetry event (seconds).
    #[serde(default = "default_event_send_timeout")]
    pub event_send_timeout_seconds: u64,
    /// How long job creation waits for the per-sink job lock (seconds).
    #[serde(default = "default_job_lock_timeout")]
    pub job_lock_timeout_seconds: u64,
    /// Maximum number of load jobs created for one file.
    #[serde(default = "default_max_import_attempts")]
    pub max_import_attempts: u32,
    /// How long an import waits for its load job (seconds).
    #[serde(default = "default_job_wait_timeout")]
    pub job_wait_timeout_seconds: u64,
}

impl Default for BridgeServerConfig {
    fn default() -> Self {
        Self {
            job_limit: default_job_limit(),
            event_send_timeout_seconds: default_event_send_timeout(),
            job_lock_timeout_seconds: default_job_lock_timeout(),
            max_import_attempts: default_max_import_attempts(),
            job_wait_timeout_seconds: default_job_wait_timeout(),
        }
    }
}

impl BridgeServerConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        check_range("bridge.job_limit", self.job_limit, 1, 100)?;
        check_range(
            "bridge.event_send_timeout_seconds",
            self.event_send_timeout_seconds,
            1,
            300,
        )?;
        check_range(
            "bridge.job_lock_timeout_seconds",
            self.job_lock_timeout_seconds,
            1,
            600,
        )?;
        check_range(
            "bridge.max_import_attempts",
            self.max_import_attempts,
            1,
            100,
        )?;
        check_range(
            "bridge.job_wait_timeout_seconds",
            self.job_wait_timeout_seconds,
            60,
            86_400,
        )
    }

    /// Runtime configuration of the bridge.
    pub fn to_bridge_config(&self) -> BridgeConfig {
        let job_lock_timeout = Duration::from_secs(self.job_lock_timeout_seconds);
        BridgeConfig {
            job_limit: self.job_limit,
            event_send_timeout: Duration::from_secs(self.event_send_timeout_seconds),
            job_lock_timeout,
            // The lock outlives the longest wait for it.
            job_lock_ttl: job_lock_timeout * 2,
            max_import_attempts: self.max_import_attempts,
            job_wait_timeout: Duration::from_secs(self.job_wait_timeout_seconds),
            ..BridgeConfig::default()
        }
    }
}

/// Check that `value` lies in `min..=max`.
pub(crate) fn check_range<T>(field: &str, value: T, min: T, max: T) -> Result<(), String>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(format!(
            "{field} must be between {min} and {max}, got {value}"
        ));
    }
    Ok(())
}

fn default_job_limit() -> usize {
    2
}

fn default_event_send_timeout() -> u64 {
    30
}

fn default_job_lock_timeout() -> u64 {
    30
}

fn default_max_import_attempts() -> u32 {
    5
}

fn default_job_wait_timeout() -> u64 {
    3600
}
