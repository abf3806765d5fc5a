//! Compensating actions for multi-step provisioning.
//!
//! Each step that creates a remote resource registers an action undoing it.
//! If the surrounding operation fails, [`Rollback::run`] invokes the actions
//! in reverse registration order. A failing action is logged and the rest
//! still run.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

type Action = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

struct Entry {
    name: String,
    action: Action,
}

/// A shared stack of compensating actions.
///
/// Clones share the same stack, so nested steps can register actions on the
/// rollback of the operation they are part of.
#[derive(Clone, Default)]
pub struct Rollback {
    actions: Arc<Mutex<Vec<Entry>>>,
}

impl fmt::Debug for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rollback")
            .field("pending", &self.len())
            .finish()
    }
}

impl Rollback {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compensating action.
    pub fn add<F, Fut, E>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display,
    {
        let action: Action = Box::new(move || {
            let fut = action();
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        });
        self.actions.lock().push(Entry {
            name: name.into(),
            action,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all registered actions; called once the operation has committed.
    pub fn clear(&self) {
        self.actions.lock().clear();
    }

    /// Run every registered action in reverse order and empty the stack.
    ///
    /// Returns the number of actions that failed.
    pub async fn run(&self) -> usize {
        let entries = std::mem::take(&mut *self.actions.lock());
        let mut failed = 0;
        for entry in entries.into_iter().rev() {
            match (entry.action)().await {
                Ok(()) => debug!(action = %entry.name, "rollback action done"),
                Err(e) => {
                    failed += 1;
                    warn!(action = %entry.name, error = %e, "rollback action failed");
                }
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_in_reverse_order() {
        let rollback = Rollback::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["bucket", "table", "token"] {
            let order = Arc::clone(&order);
            rollback.add(name, move || async move {
                order.lock().push(name);
                Ok::<_, String>(())
            });
        }

        assert_eq!(rollback.len(), 3);
        assert_eq!(rollback.run().await, 0);
        assert_eq!(*order.lock(), vec!["token", "table", "bucket"]);
        assert!(rollback.is_empty());
    }

    #[tokio::test]
    async fn failing_action_does_not_stop_the_rest() {
        let rollback = Rollback::new();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&ran);
        rollback.add("first", move || async move {
            first.lock().push("first");
            Ok::<_, String>(())
        });
        rollback.add("broken", || async { Err::<(), _>("remote unavailable") });

        assert_eq!(rollback.run().await, 1);
        assert_eq!(*ran.lock(), vec!["first"]);
    }

    #[tokio::test]
    async fn clear_drops_actions() {
        let rollback = Rollback::new();
        let clone = rollback.clone();
        clone.add("noop", || async { Ok::<_, String>(()) });
        assert_eq!(rollback.len(), 1);
        rollback.clear();
        assert_eq!(rollback.run().await, 0);
    }
}
