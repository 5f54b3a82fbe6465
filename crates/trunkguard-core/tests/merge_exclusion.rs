// Integration tests have relaxed clippy settings for brutal test scenarios.
// Production code (src/) must use strict zero-unwrap/panic patterns.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    // Test code ergonomics
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::missing_panics_doc,
)]
//! The per-target merge lock keeps trunk mutations strictly serialized,
//! even when two executors race on the same target.

mod common;

use std::{sync::Arc, time::Duration};

use common::FakeRepository;
use trunkguard_core::coordination::{
    audit_trail, submit, IntegrationStatus, MergeExecutor, MergeLock, MergeLockSettings,
    MergeOutcome, QueueStore, SubmitRequest,
};

fn fast_settings() -> MergeLockSettings {
    MergeLockSettings {
        ttl: Duration::from_secs(600),
        timeout: Duration::from_secs(5),
        retry: Duration::from_millis(10),
    }
}

async fn lock_for(store: &QueueStore, settings: MergeLockSettings) -> MergeLock {
    let lock = MergeLock::new(store.pool().clone(), settings);
    lock.init().await.unwrap();
    lock
}

// ============================================================================
// LOCK SEMANTICS
// ============================================================================

#[tokio::test]
async fn test_merge_lock_is_exclusive_per_target() {
    let store = QueueStore::open_in_memory().await.unwrap();
    let lock = lock_for(&store, fast_settings()).await;

    assert!(lock.try_acquire("main", "worker-a:1").await.unwrap());
    assert!(!lock.try_acquire("main", "worker-b:2").await.unwrap());
    assert!(lock.try_acquire("release", "worker-b:2").await.unwrap());
    assert!(lock.is_held("main").await.unwrap());

    let holder = lock.holder("main").await.unwrap().unwrap();
    assert_eq!(holder.holder, "worker-a:1");

    assert!(lock.release("main", "worker-a:1").await.unwrap());
    assert!(!lock.is_held("main").await.unwrap());
    assert!(lock.try_acquire("main", "worker-b:2").await.unwrap());
}

#[tokio::test]
async fn test_acquire_times_out_while_held() {
    let store = QueueStore::open_in_memory().await.unwrap();
    let lock = lock_for(
        &store,
        MergeLockSettings {
            timeout: Duration::from_millis(60),
            ..fast_settings()
        },
    )
    .await;

    lock.acquire("main", "worker-a:1").await.unwrap();
    let err = lock.acquire("main", "worker-b:2").await.unwrap_err();
    assert_eq!(err.code(), "LOCK_TIMEOUT");
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_expired_holder_is_evicted() {
    let store = QueueStore::open_in_memory().await.unwrap();
    let lock = lock_for(
        &store,
        MergeLockSettings {
            ttl: Duration::from_millis(20),
            ..fast_settings()
        },
    )
    .await;

    assert!(lock.try_acquire("main", "crashed:1").await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(lock.try_acquire("main", "worker-b:2").await.unwrap());
    assert_eq!(lock.holder("main").await.unwrap().unwrap().holder, "worker-b:2");
}

#[tokio::test]
async fn test_lock_operations_are_audited() {
    let store = QueueStore::open_in_memory().await.unwrap();
    let lock = lock_for(&store, fast_settings()).await;

    lock.acquire("main", "worker-a:1").await.unwrap();
    lock.release("main", "worker-a:1").await.unwrap();

    let trail = audit_trail(store.pool(), "merge:main").await.unwrap();
    let operations: Vec<&str> = trail.iter().map(|e| e.operation.as_str()).collect();
    assert_eq!(operations, vec!["acquire", "release"]);
}

// ============================================================================
// RACING EXECUTORS
// ============================================================================

#[tokio::test]
async fn test_racing_executors_never_interleave_trunk_updates() {
    let store = QueueStore::open_in_memory().await.unwrap();
    let repo = FakeRepository::new();
    repo.feature("feature/a", "a.txt", "a\n");
    repo.feature("feature/b", "b.txt", "b\n");
    repo.set_push_delay_ms(50);

    for branch in ["feature/a", "feature/b"] {
        submit(&store, &repo, SubmitRequest::new(branch, "main", "t"), 5)
            .await
            .unwrap();
    }
    let first = store.dequeue_next_queued().await.unwrap().unwrap();
    let second = store.dequeue_next_queued().await.unwrap().unwrap();

    let lock = lock_for(&store, fast_settings()).await;
    let shared: Arc<dyn trunkguard_core::repository::RepositoryClient> = Arc::new(repo.clone());
    let left = MergeExecutor::new(Arc::clone(&shared), store.clone(), lock.clone(), "left");
    let right = MergeExecutor::new(shared, store.clone(), lock, "right");

    let (a, b) = tokio::join!(left.execute(&first), right.execute(&second));
    let a = a.unwrap();
    let b = b.unwrap();
    assert!(matches!(a, MergeOutcome::Merged { .. }));
    assert!(matches!(b, MergeOutcome::Merged { .. }));

    // Whoever went second built on the other's result.
    let (ea, eb) = (a.entry(), b.entry());
    assert!(ea.trunk_before == eb.trunk_after || eb.trunk_before == ea.trunk_after);
    assert_ne!(ea.trunk_after, eb.trunk_after);

    let files = repo.files_at("main");
    assert!(files.contains_key("a.txt"));
    assert!(files.contains_key("b.txt"));

    for id in [first.id, second.id] {
        assert_eq!(store.get(id).await.unwrap().status, IntegrationStatus::Merged);
    }
    assert_eq!(store.merging_count("main").await.unwrap(), 0);
}

#[tokio::test]
async fn test_lock_timeout_requeues_the_request() {
    let store = QueueStore::open_in_memory().await.unwrap();
    let repo = FakeRepository::new();
    repo.feature("feature/a", "a.txt", "a\n");
    let entry = submit(&store, &repo, SubmitRequest::new("feature/a", "main", "t"), 5)
        .await
        .unwrap();
    let claimed = store.dequeue_next_queued().await.unwrap().unwrap();

    let lock = lock_for(
        &store,
        MergeLockSettings {
            timeout: Duration::from_millis(50),
            ..fast_settings()
        },
    )
    .await;
    lock.acquire("main", "rollback:7").await.unwrap();

    let executor = MergeExecutor::new(Arc::new(repo.clone()), store.clone(), lock, "worker");
    let err = executor.execute(&claimed).await.unwrap_err();
    assert_eq!(err.code(), "LOCK_TIMEOUT");

    let stored = store.get(entry.id).await.unwrap();
    assert_eq!(stored.status, IntegrationStatus::Queued);
    assert!(stored.conflict_report.is_none());
    assert!(stored.last_error.is_some());
    assert_eq!(repo.ref_mutations(), 0);
}

#[tokio::test]
async fn test_slow_merge_keeps_its_lock_past_ttl() {
    let store = QueueStore::open_in_memory().await.unwrap();
    let repo = FakeRepository::new();
    repo.feature("feature/a", "a.txt", "a\n");
    repo.set_push_delay_ms(600);
    let entry = submit(&store, &repo, SubmitRequest::new("feature/a", "main", "t"), 5)
        .await
        .unwrap();
    let claimed = store.dequeue_next_queued().await.unwrap().unwrap();

    let lock = lock_for(
        &store,
        MergeLockSettings {
            ttl: Duration::from_millis(150),
            ..fast_settings()
        },
    )
    .await;
    let executor = MergeExecutor::new(Arc::new(repo.clone()), store.clone(), lock.clone(), "worker");

    let contender = async {
        tokio::time::sleep(Duration::from_millis(400)).await;
        lock.try_acquire("main", "rollback:9").await.unwrap()
    };
    let (outcome, stolen) = tokio::join!(executor.execute(&claimed), contender);

    assert!(!stolen, "lease expired during the merge");
    assert!(matches!(outcome.unwrap(), MergeOutcome::Merged { .. }));
    assert_eq!(store.get(entry.id).await.unwrap().status, IntegrationStatus::Merged);
    assert!(!lock.is_held("main").await.unwrap());
}
