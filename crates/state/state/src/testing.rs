use std::time::Duration;

use crate::atomic::AtomicOp;
use crate::error::StateError;
use crate::lock::DistributedLock;
use crate::store::{Condition, MetadataStore, Mutation, Txn};

/// Run the full metadata store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn MetadataStore) -> Result<(), StateError> {
    test_get_missing(store).await?;
    test_put_and_get(store).await?;
    test_revisions_increase(store).await?;
    test_list_prefix(store).await?;
    test_delete(store).await?;
    test_txn_missing(store).await?;
    test_txn_mod_revision(store).await?;
    test_txn_delete_prefix(store).await?;
    test_atomic_op_commit_actions(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn MetadataStore) -> Result<(), StateError> {
    let val = store.get("conformance/missing").await?;
    assert!(val.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_put_and_get(store: &dyn MetadataStore) -> Result<(), StateError> {
    let rev = store.put("conformance/put-get", "hello").await?;
    let kv = store
        .get("conformance/put-get")
        .await?
        .expect("key should exist after put");
    assert_eq!(kv.value, "hello");
    assert_eq!(kv.key, "conformance/put-get");
    assert_eq!(kv.mod_revision, rev);
    assert_eq!(kv.create_revision, rev);
    Ok(())
}

async fn test_revisions_increase(store: &dyn MetadataStore) -> Result<(), StateError> {
    let first = store.put("conformance/rev", "v1").await?;
    let second = store.put("conformance/rev", "v2").await?;
    assert!(second > first, "mod revision should increase on overwrite");

    let kv = store.get("conformance/rev").await?.expect("key should exist");
    assert_eq!(kv.create_revision, first, "create revision should be kept");
    assert_eq!(kv.mod_revision, second);
    Ok(())
}

async fn test_list_prefix(store: &dyn MetadataStore) -> Result<(), StateError> {
    store.put("conformance/list/b", "2").await?;
    store.put("conformance/list/a", "1").await?;
    store.put("conformance/list-other/c", "3").await?;

    let listed = store.list("conformance/list/").await?;
    let keys: Vec<&str> = listed.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, vec!["conformance/list/a", "conformance/list/b"]);
    Ok(())
}

async fn test_delete(store: &dyn MetadataStore) -> Result<(), StateError> {
    store.put("conformance/to-delete", "bye").await?;
    assert!(store.delete("conformance/to-delete").await?);
    assert!(store.get("conformance/to-delete").await?.is_none());
    assert!(
        !store.delete("conformance/to-delete").await?,
        "delete on missing key should return false"
    );
    Ok(())
}

async fn test_txn_missing(store: &dyn MetadataStore) -> Result<(), StateError> {
    let create = || {
        Txn::new()
            .when(Condition::Missing("conformance/txn-create".into()))
            .then(Mutation::Put {
                key: "conformance/txn-create".into(),
                value: "created".into(),
            })
    };

    assert!(store.txn(create()).await?.succeeded);
    assert!(
        !store.txn(create()).await?.succeeded,
        "second create should fail the Missing condition"
    );
    Ok(())
}

async fn test_txn_mod_revision(store: &dyn MetadataStore) -> Result<(), StateError> {
    let rev = store.put("conformance/txn-cas", "v1").await?;
    let update = |revision| {
        Txn::new()
            .when(Condition::ModRevision {
                key: "conformance/txn-cas".into(),
                revision,
            })
            .then(Mutation::Put {
                key: "conformance/txn-cas".into(),
                value: "v2".into(),
            })
            .then(Mutation::Put {
                key: "conformance/txn-cas-side".into(),
                value: "side".into(),
            })
    };

    let stale = store.txn(update(rev - 1)).await?;
    assert!(!stale.succeeded, "stale revision should fail");
    assert!(
        store.get("conformance/txn-cas-side").await?.is_none(),
        "failed txn must not write anything"
    );

    let ok = store.txn(update(rev)).await?;
    assert!(ok.succeeded);
    let kv = store.get("conformance/txn-cas").await?.expect("key exists");
    assert_eq!(kv.value, "v2");
    assert_eq!(kv.mod_revision, ok.revision);
    assert!(store.get("conformance/txn-cas-side").await?.is_some());
    Ok(())
}

async fn test_txn_delete_prefix(store: &dyn MetadataStore) -> Result<(), StateError> {
    store.put("conformance/cascade/file", "f").await?;
    store.put("conformance/cascade/file/slice-1", "s1").await?;
    store.put("conformance/cascade/file/slice-2", "s2").await?;

    let txn = Txn::new()
        .when(Condition::Exists("conformance/cascade/file".into()))
        .then(Mutation::Delete {
            key: "conformance/cascade/file".into(),
        })
        .then(Mutation::DeletePrefix {
            prefix: "conformance/cascade/file/".into(),
        });
    assert!(store.txn(txn).await?.succeeded);
    assert!(store.list("conformance/cascade/").await?.is_empty());
    Ok(())
}

async fn test_atomic_op_commit_actions(store: &dyn MetadataStore) -> Result<(), StateError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut op = AtomicOp::new();
    op.require_revision("conformance/atomic", None)
        .put("conformance/atomic", "1");
    let sender = tx.clone();
    op.on_commit(move || async move {
        let _ = sender.send("committed");
    });
    op.commit(store).await?;
    assert_eq!(rx.try_recv().ok(), Some("committed"));

    let mut conflicting = AtomicOp::new();
    conflicting
        .require_revision("conformance/atomic", None)
        .put("conformance/atomic", "2");
    conflicting.on_commit(move || async move {
        let _ = tx.send("must not run");
    });
    let err = conflicting
        .commit(store)
        .await
        .expect_err("second create should conflict");
    assert!(err.is_conflict());
    assert!(rx.try_recv().is_err(), "commit actions must not run on conflict");
    Ok(())
}

/// Run the full distributed lock conformance test suite.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_lock_conformance_tests(lock: &dyn DistributedLock) -> Result<(), StateError> {
    test_try_lock_and_release(lock).await?;
    test_try_lock_contention(lock).await?;
    test_lock_is_held(lock).await?;
    test_blocking_lock_times_out(lock).await?;
    Ok(())
}

async fn test_try_lock_and_release(lock: &dyn DistributedLock) -> Result<(), StateError> {
    let guard = lock
        .try_lock("test-lock-1", Duration::from_secs(10))
        .await?
        .expect("should acquire uncontested lock");
    assert_eq!(guard.name(), "test-lock-1");
    guard.release().await?;

    let again = lock.try_lock("test-lock-1", Duration::from_secs(10)).await?;
    assert!(again.is_some(), "released lock should be free");
    if let Some(guard) = again {
        guard.release().await?;
    }
    Ok(())
}

async fn test_try_lock_contention(lock: &dyn DistributedLock) -> Result<(), StateError> {
    let held = lock
        .try_lock("test-lock-2", Duration::from_secs(10))
        .await?
        .expect("should acquire lock");

    let second = lock.try_lock("test-lock-2", Duration::from_secs(10)).await?;
    assert!(
        second.is_none(),
        "second acquire should fail while lock is held"
    );

    held.release().await?;
    Ok(())
}

async fn test_lock_is_held(lock: &dyn DistributedLock) -> Result<(), StateError> {
    let guard = lock
        .try_lock("test-lock-3", Duration::from_secs(10))
        .await?
        .expect("should acquire lock");

    assert!(guard.is_held().await?, "lock should be held");
    guard.release().await?;
    Ok(())
}

async fn test_blocking_lock_times_out(lock: &dyn DistributedLock) -> Result<(), StateError> {
    let held = lock
        .try_lock("test-lock-4", Duration::from_secs(30))
        .await?
        .expect("should acquire lock");

    let result = lock
        .lock(
            "test-lock-4",
            Duration::from_secs(5),
            Duration::from_millis(200),
        )
        .await;
    assert!(
        matches!(result, Err(StateError::Timeout(_))),
        "blocking lock should time out while held"
    );

    held.release().await?;
    Ok(())
}
