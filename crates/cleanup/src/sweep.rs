//! Bounded fan-out of per-entity cleanup work and the periodic driver.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CleanupError;

/// Result of one sweep over a set of entities.
#[derive(Debug, Default)]
pub(crate) struct SweepOutcome {
    /// Entities whose work returned `true`.
    pub done: usize,
    pub errors: Vec<CleanupError>,
    /// The error tolerance was exceeded and the remaining work dropped.
    pub cancelled: bool,
    /// Entities never started because the sweep was stopped.
    pub skipped: usize,
}

impl SweepOutcome {
    fn record(&mut self, result: Result<Result<bool, CleanupError>, JoinError>) {
        match result {
            Ok(Ok(true)) => self.done += 1,
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "cleanup of entity failed");
                self.errors.push(e);
            }
            Err(e) => {
                warn!(error = %e, "cleanup task failed");
                self.errors.push(CleanupError::Task(e.to_string()));
            }
        }
    }

    fn exceeds(&self, tolerance: Option<usize>) -> bool {
        tolerance.is_some_and(|t| self.errors.len() > t)
    }
}

/// Run `work` for every item, at most `concurrency` at a time.
///
/// Errors are collected. With a `tolerance`, the sweep stops spawning and
/// aborts the in-flight tasks once more than `tolerance` items failed. Once
/// `stop` is cancelled no new item is started and the started ones run to
/// completion.
pub(crate) async fn sweep<T, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    tolerance: Option<usize>,
    stop: &CancellationToken,
    work: F,
) -> SweepOutcome
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<bool, CleanupError>> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut outcome = SweepOutcome::default();
    let mut items = items.into_iter();

    while items.len() > 0 {
        while let Some(result) = tasks.try_join_next() {
            outcome.record(result);
        }
        if outcome.exceeds(tolerance) || stop.is_cancelled() {
            break;
        }

        let permit = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        while let Some(result) = tasks.try_join_next() {
            outcome.record(result);
        }
        if outcome.exceeds(tolerance) {
            break;
        }

        let Some(item) = items.next() else {
            break;
        };
        let fut = work(item);
        tasks.spawn(async move {
            let result = fut.await;
            drop(permit);
            result
        });
    }

    outcome.skipped = items.len();
    if outcome.skipped > 0 && stop.is_cancelled() {
        debug!(
            skipped = outcome.skipped,
            running = tasks.len(),
            "sweep stopped, draining started work"
        );
    }

    while !outcome.exceeds(tolerance) {
        let Some(result) = tasks.join_next().await else {
            break;
        };
        outcome.record(result);
    }

    if outcome.exceeds(tolerance) {
        outcome.cancelled = true;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
    outcome
}

/// Run `cycle` every `period` until `shutdown` is cancelled.
///
/// Each cycle is bounded by `cycle_timeout`; a timed out cycle drops its
/// in-flight work. A cycle running at shutdown receives the cancelled token
/// and is awaited until it returns.
pub(crate) async fn run_periodic<F, Fut, R>(
    name: &'static str,
    period: Duration,
    cycle_timeout: Duration,
    shutdown: CancellationToken,
    cycle: F,
) where
    F: Fn(CancellationToken) -> Fut,
    Fut: Future<Output = Result<R, CleanupError>>,
    R: std::fmt::Debug,
{
    info!(operator = name, period = ?period, "cleanup operator starting");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match tokio::time::timeout(cycle_timeout, cycle(shutdown.clone())).await {
            Ok(Ok(report)) => debug!(operator = name, report = ?report, "cleanup cycle finished"),
            Ok(Err(e)) => error!(operator = name, error = %e, "cleanup cycle failed"),
            Err(_) => {
                let e = CleanupError::Timeout(cycle_timeout);
                error!(operator = name, error = %e, "cleanup cycle failed");
            }
        }
    }

    info!(operator = name, "cleanup operator stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sinkbridge_bridge::BridgeError;

    use super::*;

    fn failure() -> CleanupError {
        CleanupError::Bridge(BridgeError::BadRequest("broken".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let outcome = sweep((0..10).collect(), 3, None, &CancellationToken::new(), |_: u32| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(true)
            }
        })
        .await;

        assert_eq!(outcome.done, 10);
        assert!(outcome.errors.is_empty());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn errors_do_not_stop_the_sweep() {
        let outcome = sweep((0..6).collect(), 2, None, &CancellationToken::new(), |i: u32| async move {
            if i % 2 == 0 { Err(failure()) } else { Ok(i != 5) }
        })
        .await;

        assert_eq!(outcome.done, 2);
        assert_eq!(outcome.errors.len(), 3);
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn exceeded_tolerance_cancels_the_rest() {
        let started = Arc::new(AtomicUsize::new(0));
        let outcome = sweep((0..10).collect(), 1, Some(1), &CancellationToken::new(), |_: u32| {
            let started = Arc::clone(&started);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                Err(failure())
            }
        })
        .await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_runs_until_shutdown() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let cycles = Arc::clone(&cycles);
            let shutdown = shutdown.clone();
            async move {
                run_periodic(
                    "test",
                    Duration::from_secs(10),
                    Duration::from_secs(1),
                    shutdown,
                    |_| {
                        let cycles = Arc::clone(&cycles);
                        async move { Ok::<_, CleanupError>(cycles.fetch_add(1, Ordering::SeqCst)) }
                    },
                )
                .await;
            }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(cycles.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_times_out() {
        let finished = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let finished = Arc::clone(&finished);
            let shutdown = shutdown.clone();
            async move {
                run_periodic(
                    "test",
                    Duration::from_secs(10),
                    Duration::from_secs(1),
                    shutdown,
                    |_| {
                        let finished = Arc::clone(&finished);
                        async move {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            finished.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, CleanupError>(())
                        }
                    },
                )
                .await;
            }
        });

        tokio::time::sleep(Duration::from_secs(15)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_sweep_drains_started_work() {
        let finished = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();
        tokio::spawn({
            let stop = stop.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                stop.cancel();
            }
        });

        let outcome = sweep((0..10).collect(), 2, None, &stop, |_: u32| {
            let finished = Arc::clone(&finished);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        })
        .await;

        assert_eq!(outcome.done, 2);
        assert_eq!(outcome.skipped, 8);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert!(!outcome.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_running_cycle() {
        let finished = Arc::new(AtomicUsize::new(0));
        let saw_stop = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let finished = Arc::clone(&finished);
            let saw_stop = Arc::clone(&saw_stop);
            let shutdown = shutdown.clone();
            async move {
                run_periodic(
                    "test",
                    Duration::from_secs(60),
                    Duration::from_secs(30),
                    shutdown,
                    |stop| {
                        let finished = Arc::clone(&finished);
                        let saw_stop = Arc::clone(&saw_stop);
                        async move {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            if stop.is_cancelled() {
                                saw_stop.fetch_add(1, Ordering::SeqCst);
                            }
                            finished.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, CleanupError>(())
                        }
                    },
                )
                .await;
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(saw_stop.load(Ordering::SeqCst), 1);
    }
}
