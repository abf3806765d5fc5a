//! Keyed single-flight of in-process calls.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

type InFlight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Collapses concurrent calls with the same key into one execution.
///
/// Callers that arrive while a call for the key is running receive a clone
/// of its result. The next call after completion runs again.
pub struct Deduplicator<T, E> {
    in_flight: Mutex<HashMap<String, InFlight<T, E>>>,
}

impl<T, E> Default for Deduplicator<T, E> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl<T, E> fmt::Debug for Deduplicator<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator")
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl<T, E> Deduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` for `key` unless a call for the key is already running.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(key) {
                existing.clone()
            } else {
                let fut: BoxFuture<'static, Result<T, E>> = make().boxed();
                let shared = fut.shared();
                in_flight.insert(key.to_owned(), shared.clone());
                shared
            }
        };

        let result = shared.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(key)
            .is_some_and(|current| current.ptr_eq(&shared))
        {
            in_flight.remove(key);
        }
        result
    }

    /// Number of keys with a running call.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_execution() {
        let dedup = Arc::new(Deduplicator::<u32, String>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let dedup = Arc::clone(&dedup);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                dedup
                    .run("bucket", move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, String>(7)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn different_keys_run_separately() {
        let dedup = Deduplicator::<String, String>::new();
        let a = dedup.run("a", || async { Ok("a".to_owned()) }).await;
        let b = dedup.run("b", || async { Ok("b".to_owned()) }).await;
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
    }

    #[tokio::test]
    async fn errors_are_shared_and_not_cached() {
        let dedup = Deduplicator::<u32, String>::new();
        let err = dedup
            .run("k", || async { Err::<u32, _>("boom".to_owned()) })
            .await;
        assert_eq!(err, Err("boom".to_owned()));

        let ok = dedup.run("k", || async { Ok::<_, String>(1) }).await;
        assert_eq!(ok, Ok(1));
    }
}
