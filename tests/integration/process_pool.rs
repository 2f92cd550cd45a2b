//! Process backend against the echo_worker binary

use std::time::Duration;

use serde_json::json;
use tokio_workers::pool::{PoolError, PoolEvent, TimeoutPolicy};

use crate::helpers::*;

#[tokio::test]
async fn test_echo_round_trip_in_order() {
    let pool = echo_pool(pool_options(2)).await;

    let assignments: Vec<_> = (0..6).map(|n| pool.assign(json!({ "n": n }))).collect();
    let outputs: Vec<_> = futures_util::future::join_all(assignments)
        .await
        .into_iter()
        .map(|r| r.expect("echo output"))
        .collect();

    let expected: Vec<_> = (0..6).map(|n| json!({ "n": n })).collect();
    assert_eq!(outputs, expected);

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.completed, 6);
    assert_eq!(stats.idle, 2);
}

#[tokio::test]
async fn test_workers_are_separate_processes() {
    let pool = echo_pool(pool_options(3)).await;

    let mut pids = worker_pids(&pool).await;
    assert_eq!(pids.len(), 3);
    assert!(!pids.contains(&u64::from(std::process::id())));

    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), 3, "every worker should have its own pid");
}

#[tokio::test]
async fn test_task_error_keeps_worker() {
    let pool = echo_pool(pool_options(1)).await;
    let before = worker_pids(&pool).await;

    let result = pool.assign(json!({ "fail": "nope" })).await;
    assert_eq!(result, Err(PoolError::Execution("nope".to_string())));

    assert_eq!(pool.assign(json!(1)).await, Ok(json!(1)));
    assert_eq!(worker_pids(&pool).await, before);
}

#[tokio::test]
async fn test_late_output_is_not_credited_to_next_assignment() {
    let pool = echo_pool(
        pool_options(1)
            .with_timeout(Duration::from_millis(500))
            .with_timeout_policy(TimeoutPolicy::Reclaim),
    )
    .await;
    let before = worker_pids(&pool).await;

    let slow = pool.assign(json!({ "sleep_ms": 700, "tag": "slow" }));
    let err = slow.await.unwrap_err();
    assert!(err.is_timeout());

    // Queued behind the slow input on the same process; answered after it.
    let next = pool.assign(json!({ "tag": "next" })).await;
    assert_eq!(next, Ok(json!({ "tag": "next" })));

    assert_eq!(worker_pids(&pool).await, before);
    assert_eq!(pool.stats().await.unwrap().timeouts, 1);
}

#[tokio::test]
async fn test_timeout_replace_spawns_new_process() {
    let pool = echo_pool(
        pool_options(1)
            .with_timeout(Duration::from_millis(200))
            .with_timeout_policy(TimeoutPolicy::Replace),
    )
    .await;
    let before = worker_pids(&pool).await;

    let err = pool.assign(json!({ "sleep_ms": 5_000 })).await.unwrap_err();
    assert!(err.is_timeout());

    assert_eq!(pool.assign(json!("after")).await, Ok(json!("after")));
    let after = worker_pids(&pool).await;
    assert_eq!(after.len(), 1);
    assert_ne!(after, before);
}

#[tokio::test]
async fn test_crash_faults_only_its_assignment() {
    let pool = echo_pool(pool_options(2)).await;
    let mut events = pool.subscribe();

    let crash = pool.assign(json!({ "exit": 3 }));
    let fine = pool.assign(json!({ "sleep_ms": 50 }));

    let err = crash.await.unwrap_err();
    assert!(err.is_worker_fault(), "unexpected error: {}", err);
    assert_eq!(fine.await, Ok(json!({ "sleep_ms": 50 })));

    let fault = loop {
        match events.recv().await.expect("event") {
            PoolEvent::WorkerFault { message, .. } => break message,
            _ => continue,
        }
    };
    assert!(fault.contains("exited unexpectedly"));

    // The replacement serves new work.
    assert_eq!(pool.assign(json!(2)).await, Ok(json!(2)));
    assert_eq!(pool.stats().await.unwrap().faults, 1);
}

#[tokio::test]
async fn test_clear_rejects_in_flight_work() {
    let pool = echo_pool(pool_options(1)).await;

    let running = pool.assign(json!({ "sleep_ms": 5_000 }));
    let queued = pool.assign(json!(1));
    // Make sure the first input reached the worker.
    pool.stats().await.unwrap();
    pool.clear();

    assert_eq!(running.await, Err(PoolError::Shutdown));
    assert_eq!(queued.await, Err(PoolError::Shutdown));
    pool.closed().await;

    assert_eq!(pool.assign(json!(2)).await, Err(PoolError::Shutdown));
}
