use std::time::Duration;

/// Delays between the polls of a running storage job.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// The delay starts at `initial` and grows by `multiplier` after every
    /// poll until it reaches `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
    /// The same delay after every poll.
    Constant { delay: Duration },
}

impl RetryStrategy {
    /// Delay after the zero-based `attempt`-th poll.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                // Past 32 doublings every sane configuration sits at `max`.
                let exponent = i32::try_from(attempt.min(32)).unwrap_or(32);
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if secs.is_finite() && secs < max.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    *max
                }
            }
            Self::Constant { delay } => *delay,
        }
    }

    /// Total time spent sleeping across the first `polls` polls.
    pub fn total_delay(&self, polls: u32) -> Duration {
        (0..polls).map(|attempt| self.delay_for(attempt)).sum()
    }
}

impl Default for RetryStrategy {
    /// Short first polls for small imports, settling at one poll every
    /// five seconds for long-running jobs.
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}
