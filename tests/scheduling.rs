//! Scheduling Tests
//!
//! Submission order on serial threads, all-or-nothing ATOMIC groups,
//! `run` argument handling and thread closing.

use std::sync::{Arc, Mutex};

use quarry::query::Cursor;
use quarry::schema::{DatabaseSchema, StoreSchema};
use quarry::storage::{Intersection, Storage, StorageOptions};
use quarry::tx::{MemoryBackend, Policy, ThreadState, TxError, TxMode, TxScope};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

fn schema() -> DatabaseSchema {
    DatabaseSchema::new(vec![
        StoreSchema::new("s1"),
        StoreSchema::new("s2"),
        StoreSchema::new("people")
            .with_key_path("id")
            .with_indexes(["city", "team"]),
    ])
    .unwrap()
}

fn open(options: StorageOptions) -> (Storage, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new(schema()));
    let storage = Storage::new(schema(), options, backend.clone()).unwrap();
    (storage, backend)
}

// =============================================================================
// Ordering Tests
// =============================================================================

/// Callbacks on a serial thread run in submission order.
#[tokio::test]
async fn test_serial_thread_keeps_submission_order() {
    let (storage, _) = open(StorageOptions::default());
    let operator = storage.branch("single", true, None, None, None).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut requests = Vec::new();
    for i in 0..10 {
        let seen = Arc::clone(&seen);
        requests.push(
            operator
                .exec(&["s1"], TxMode::ReadOnly, move |_ctx| {
                    seen.lock().unwrap().push(i);
                    Ok(())
                })
                .unwrap(),
        );
    }
    for request in requests {
        request.await.unwrap();
    }

    assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

/// Serial order holds when the dispatcher and the caller run on different
/// workers.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serial_order_on_worker_pool() {
    let (storage, _) = open(StorageOptions::default());
    let operator = storage.branch("multi", true, None, None, None).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut requests = Vec::new();
    for i in 0..50 {
        let seen = Arc::clone(&seen);
        requests.push(
            operator
                .exec(&["s1"], TxMode::ReadWrite, move |ctx| {
                    seen.lock().unwrap().push(i);
                    ctx.put("s1", json!(i), Some(json!(i)))
                })
                .unwrap(),
        );
        if i % 7 == 0 {
            tokio::task::yield_now().await;
        }
    }
    for request in requests {
        request.await.unwrap();
    }

    assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
}

/// Separate transactions get increasing sequence numbers across threads.
#[tokio::test]
async fn test_sequence_numbers_shared_by_threads() {
    let (storage, _) = open(StorageOptions::default());
    let a = storage.branch("single", true, None, None, None).unwrap();
    let b = storage.branch("single", true, None, None, None).unwrap();

    let first = a.exec(&["s1"], TxMode::ReadOnly, |ctx| Ok(ctx.seq())).unwrap().await.unwrap();
    let second = b.exec(&["s1"], TxMode::ReadOnly, |ctx| Ok(ctx.seq())).unwrap().await.unwrap();
    assert_eq!((first, second), (1, 2));
    assert_eq!(storage.tx_no(), 2);
}

// =============================================================================
// Atomic Tests
// =============================================================================

/// A failing second request aborts the whole ATOMIC group.
#[tokio::test]
async fn test_atomic_group_fails_as_one() {
    let (storage, backend) = open(StorageOptions::default());
    let operator = storage.branch("atomic", true, None, None, None).unwrap();

    let (first, second) = operator
        .atomic(|group| {
            let first = group.put("s1", json!("one"), Some(json!(1)))?;
            let second = group.exec(&["s2"], TxMode::ReadWrite, |ctx| {
                ctx.put("s2", json!("two"), Some(json!(2)))?;
                Err::<(), _>(TxError::backend("constraint violated"))
            })?;
            Ok((first, second))
        })
        .unwrap();

    assert!(matches!(first.await, Err(TxError::Aborted(_))));
    assert_eq!(second.await, Err(TxError::backend("constraint violated")));
    assert!(backend.snapshot("s1").is_empty());
    assert!(backend.snapshot("s2").is_empty());
    assert_eq!(backend.commits(), 0);
    assert_eq!(storage.metrics().tx_aborted, 1);
}

/// Group boundaries hold while the dispatcher runs on another worker.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_atomic_group_holds_on_worker_pool() {
    let (storage, backend) = open(StorageOptions::default());
    let operator = storage.branch("atomic", false, None, None, None).unwrap();

    for round in 0..5 {
        let (first, second) = operator
            .atomic(|group| {
                let first = group.put("s1", json!("a"), Some(json!(round)))?;
                std::thread::sleep(std::time::Duration::from_millis(10));
                let second = group.exec(&["s2"], TxMode::ReadWrite, |ctx| {
                    ctx.put("s2", json!("b"), Some(json!(1)))?;
                    Err::<(), _>(TxError::backend("constraint"))
                })?;
                Ok((first, second))
            })
            .unwrap();
        assert!(first.await.is_err());
        assert!(second.await.is_err());
    }

    assert!(backend.snapshot("s1").is_empty());
    assert!(backend.snapshot("s2").is_empty());
    assert_eq!(backend.commits(), 0);
}

/// A group that succeeds commits every store at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_atomic_group_commits_together() {
    let (storage, backend) = open(StorageOptions::default());
    let operator = storage.branch("atomic", true, None, None, None).unwrap();

    let (a, b) = operator
        .atomic(|group| {
            let a = group.put("s1", json!("a"), Some(json!(1)))?;
            let b = group.put("s2", json!("b"), Some(json!(1)))?;
            Ok((a, b))
        })
        .unwrap();

    assert_eq!(a.await.unwrap(), json!(1));
    assert_eq!(b.await.unwrap(), json!(1));
    assert_eq!(backend.commits(), 1);
    assert_eq!(backend.snapshot("s2"), vec![json!("b")]);
}

#[tokio::test]
async fn test_atomic_needs_atomic_thread() {
    let (storage, _) = open(StorageOptions::default());
    let result = storage
        .operator()
        .atomic(|group| group.put("s1", json!("a"), Some(json!(1))));
    assert!(matches!(result, Err(TxError::InvalidOperation(_))));
}

/// Without ATOMIC, siblings of a failed request still commit.
#[tokio::test]
async fn test_multi_siblings_survive_failure() {
    let (storage, backend) = open(StorageOptions::default());
    let operator = storage.branch("multi", true, None, None, None).unwrap();

    let ok = operator
        .exec(&["s1", "s2"], TxMode::ReadWrite, |ctx| {
            ctx.put("s1", json!("kept"), Some(json!(1)))
        })
        .unwrap();
    let failed = operator
        .exec(&["s1"], TxMode::ReadWrite, |ctx| -> Result<(), TxError> {
            ctx.put("s1", json!("partial"), Some(json!(2)))?;
            Err(TxError::invalid_operation("rejected by callback"))
        })
        .unwrap();

    assert_eq!(ok.await.unwrap(), json!(1));
    assert!(matches!(failed.await, Err(TxError::InvalidOperation(_))));
    // The failed request's own write is gone
    assert_eq!(backend.snapshot("s1"), vec![json!("kept")]);
}

// =============================================================================
// Run Tests
// =============================================================================

#[tokio::test]
async fn test_run_resolves_with_transaction_number() {
    let (storage, backend) = open(StorageOptions::default());
    storage
        .operator()
        .exec(&["s1"], TxMode::ReadOnly, |_ctx| Ok(()))
        .unwrap()
        .await
        .unwrap();

    let seq = storage
        .run(
            |ctx| {
                ctx.put("s1", json!("a"), Some(json!(1)))?;
                ctx.put("s2", json!("b"), Some(json!(1)))?;
                Ok(())
            },
            None,
            Some("readwrite"),
        )
        .unwrap()
        .await
        .unwrap();

    assert_eq!(seq, 2);
    assert_eq!(backend.snapshot("s2"), vec![json!("b")]);
}

/// Four positional arguments after the callback fail before scheduling.
#[test]
fn test_run_argument_count() {
    let (storage, _) = open(StorageOptions::default());
    let args = [json!(["s1"]), json!("readonly"), json!(null), json!(1)];

    let err = storage.run_dynamic(|_ctx| Ok(()), &args).unwrap_err();
    assert!(matches!(err, TxError::Argument(_)));
    assert_eq!(storage.tx_no(), 0);
}

#[test]
fn test_run_rejects_unknown_store() {
    let (storage, _) = open(StorageOptions::default());
    assert!(matches!(
        storage.run(|_ctx| Ok(()), Some(&["s9"][..]), None),
        Err(TxError::InvalidOperation(_))
    ));
}

// =============================================================================
// Thread Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_thread_closes_at_max_tx() {
    let (storage, _) = open(StorageOptions::default());
    let thread = storage
        .new_tx_queue(Policy::Single, true, Some(&["s1"][..]), None, Some(2))
        .unwrap();

    let a = thread.submit(TxScope::read("s1"), |_ctx| Ok(())).unwrap();
    let b = thread.submit(TxScope::read("s1"), |_ctx| Ok(())).unwrap();
    let c = thread.submit(TxScope::read("s1"), |_ctx| Ok(())).unwrap();

    assert!(a.await.is_ok());
    assert!(b.await.is_ok());
    assert!(matches!(c.await, Err(TxError::InvalidOperation(_))));
    assert_eq!(thread.state(), ThreadState::Closed);
    assert!(thread.submit(TxScope::read("s1"), |_ctx| Ok(())).is_err());
}

#[test]
fn test_unknown_policy_is_argument_error() {
    let (storage, _) = open(StorageOptions::default());
    assert!(matches!(
        storage.branch("eventually", true, None, None, None),
        Err(TxError::Argument(_))
    ));
    assert!(matches!(Policy::parse("both"), Err(TxError::Argument(_))));
}

// =============================================================================
// Scan Tests
// =============================================================================

#[tokio::test]
async fn test_scan_joins_cursor_keys() {
    let (storage, _) = open(StorageOptions::default());
    let operator = storage.operator();
    for (id, city, team) in [(1, "oslo", "red"), (2, "oslo", "blue"), (3, "rome", "red")] {
        operator
            .put("people", json!({"id": id, "city": city, "team": team}), None)
            .unwrap()
            .await
            .unwrap();
    }

    let mut in_oslo = quarry::query::QueryBuilder::new();
    in_oslo.from("people").filter("city", "=", json!("oslo")).unwrap();
    let mut on_red = quarry::query::QueryBuilder::new();
    on_red.from("people").filter("team", "=", json!("red")).unwrap();

    let cursors: Vec<Cursor> = vec![
        in_oslo.build().to_cursor(storage.schema()).unwrap(),
        on_red.build().to_cursor(storage.schema()).unwrap(),
    ];
    let keys = operator.scan(cursors, Intersection).unwrap().await.unwrap();
    assert_eq!(keys, vec![json!(1)]);
}
