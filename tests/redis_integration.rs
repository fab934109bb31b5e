//! Integration tests for the Redis queue store.
//!
//! These tests need a running Redis server.
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --test redis_integration -- --ignored

use std::time::Duration;

use chrono::Utc;
use placement_scheduler::error::StoreError;
use placement_scheduler::model::{EngineTask, EngineType, Priority};
use placement_scheduler::rate_limit::CounterStore;
use placement_scheduler::store::{PartitionKey, QueueStore, RedisQueueStore};
use uuid::Uuid;

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").expect("REDIS_URL environment variable must be set for integration tests")
}

/// Each test gets its own key prefix so runs never see each other's data.
async fn create_test_store() -> RedisQueueStore {
    let prefix = format!("placement-test-{}", Uuid::new_v4());
    RedisQueueStore::connect(&get_redis_url(), &prefix)
        .await
        .expect("Should connect to Redis")
}

fn create_test_task(priority: Priority) -> EngineTask {
    EngineTask::new("campaign", "user", "web2_platforms", "https://target.io/page", "anchor text")
        .with_keywords(["rust"])
        .with_priority(priority)
}

fn partition(priority: Priority) -> PartitionKey {
    PartitionKey::new(EngineType::new("web2_platforms"), priority)
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_push_pop_ack_fifo() {
    let store = create_test_store().await;
    let first = create_test_task(Priority::High);
    let second = create_test_task(Priority::High);
    store.push(&first).await.expect("push first");
    store.push(&second).await.expect("push second");

    let key = partition(Priority::High);
    assert_eq!(store.len(&key).await.expect("len"), 2);

    let leased = store
        .pop(&key, Duration::from_secs(60))
        .await
        .expect("pop")
        .expect("task available");
    assert_eq!(leased.task.id, first.id);
    assert_eq!(store.leased(&key).await.expect("leased"), 1);

    assert!(store.ack(&leased).await.expect("ack"));
    assert!(!store.ack(&leased).await.expect("second ack"));
    assert_eq!(store.leased(&key).await.expect("leased"), 0);
    assert_eq!(store.len(&key).await.expect("len"), 1);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_task_id_rejected_until_acked() {
    let store = create_test_store().await;
    let task = create_test_task(Priority::Normal);
    store.push(&task).await.expect("push");

    let err = store.push(&task).await.expect_err("duplicate push");
    assert!(matches!(err, StoreError::DuplicateTask(id) if id == task.id));
    assert_eq!(store.len(&partition(Priority::Normal)).await.expect("len"), 1);

    let key = partition(Priority::Normal);
    let leased = store
        .pop(&key, Duration::from_secs(60))
        .await
        .expect("pop")
        .expect("task available");
    assert!(store.push(&task).await.is_err());

    assert!(store.ack(&leased).await.expect("ack"));
    store.push(&task).await.expect("id is free after ack");
}

#[tokio::test]
#[ignore]
async fn test_requeue_delays_retry() {
    let store = create_test_store().await;
    let task = create_test_task(Priority::Normal);
    store.push(&task).await.expect("push");

    let key = partition(Priority::Normal);
    let leased = store
        .pop(&key, Duration::from_secs(60))
        .await
        .expect("pop")
        .expect("task available");

    let next = task.retried(Utc::now() + chrono::Duration::minutes(5));
    assert!(store.requeue(&leased, &next).await.expect("requeue"));

    assert_eq!(store.len(&key).await.expect("len"), 1);
    assert_eq!(store.ready_len(&key).await.expect("ready"), 0);
    assert!(store
        .pop(&key, Duration::from_secs(60))
        .await
        .expect("pop")
        .is_none());
}

#[tokio::test]
#[ignore]
async fn test_reclaim_expired_lease() {
    let store = create_test_store().await;
    let task = create_test_task(Priority::Urgent);
    store.push(&task).await.expect("push");

    let key = partition(Priority::Urgent);
    let leased = store
        .pop(&key, Duration::ZERO)
        .await
        .expect("pop")
        .expect("task available");
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(store.reclaim_expired(&key).await.expect("reclaim"), 1);
    assert!(!store.ack(&leased).await.expect("stale ack"));

    let again = store
        .pop(&key, Duration::from_secs(60))
        .await
        .expect("pop")
        .expect("reclaimed task");
    assert_eq!(again.task.id, task.id);
    assert_eq!(again.task.attempts, 0);
    assert_ne!(again.receipt, leased.receipt);
    assert!(store.ack(&again).await.expect("ack"));
}

#[tokio::test]
#[ignore]
async fn test_outcome_counters_and_increment() {
    let store = create_test_store().await;
    let key = partition(Priority::Low);

    store.record_outcome(&key, true, 100).await.expect("record");
    let counters = store.record_outcome(&key, false, 300).await.expect("record");
    assert_eq!(counters.completed, 1);
    assert_eq!(counters.failed, 1);
    assert!((counters.avg_time_ms - 200.0).abs() < 1e-9);
    assert_eq!(store.counters(&key).await.expect("counters"), counters);

    let counter = format!("placement-test-counter-{}", Uuid::new_v4());
    let ttl = Duration::from_secs(60);
    assert_eq!(store.increment(&counter, ttl).await.expect("increment"), 1);
    assert_eq!(store.increment(&counter, ttl).await.expect("increment"), 2);

    assert_eq!(
        store.increment_if_below(&counter, 3, ttl).await.expect("increment"),
        Some(3)
    );
    assert_eq!(
        store.increment_if_below(&counter, 3, ttl).await.expect("increment"),
        None
    );
    assert_eq!(store.get(&counter).await.expect("get"), 3);
}
