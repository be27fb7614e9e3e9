//! Redis counter store integration tests.
//!
//! These require a local Redis on the default port and are ignored by
//! default: `cargo test -- --ignored` with `redis-server` running.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use turnstile::{ConsumeOutcome, CounterStore, RedisCounterStore, WindowParams};

async fn create_test_store() -> RedisCounterStore {
    RedisCounterStore::connect("redis://localhost:6379")
        .await
        .expect("Failed to connect to Redis")
}

/// Per-test unique key so runs do not interfere with each other.
fn unique_key(label: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("turnstile:test:{label}:{nanos}")
}

fn params(points: u32, window_secs: u64, block_secs: Option<u64>) -> WindowParams {
    WindowParams {
        points,
        window: Duration::from_secs(window_secs),
        block: block_secs.map(Duration::from_secs),
    }
}

#[tokio::test]
#[ignore = "requires a local Redis"]
async fn consume_counts_down_and_rejects() {
    let store = create_test_store().await;
    let key = unique_key("countdown");
    let params = params(3, 60, None);

    for expected_remaining in [2, 1, 0] {
        match store.consume(&key, &params).await.unwrap() {
            ConsumeOutcome::Allowed { limit, remaining, reset_after } => {
                assert_eq!(limit, 3);
                assert_eq!(remaining, expected_remaining);
                assert!(reset_after <= Duration::from_secs(60));
                assert!(reset_after > Duration::ZERO);
            }
            ConsumeOutcome::Rejected { .. } => panic!("rejected within limit"),
        }
    }

    match store.consume(&key, &params).await.unwrap() {
        ConsumeOutcome::Rejected { limit, retry_after, .. } => {
            assert_eq!(limit, 3);
            assert!(retry_after > Duration::ZERO);
            assert!(retry_after <= Duration::from_secs(60));
        }
        ConsumeOutcome::Allowed { .. } => panic!("allowed over limit"),
    }
}

#[tokio::test]
#[ignore = "requires a local Redis"]
async fn block_duration_extends_ttl() {
    let store = create_test_store().await;
    let key = unique_key("block");
    let params = params(1, 2, Some(600));

    assert!(store.consume(&key, &params).await.unwrap().is_allowed());

    match store.consume(&key, &params).await.unwrap() {
        ConsumeOutcome::Rejected { retry_after, .. } => {
            // The block period replaces the 2s window remainder.
            assert!(retry_after > Duration::from_secs(500));
            assert!(retry_after <= Duration::from_secs(600));
        }
        ConsumeOutcome::Allowed { .. } => panic!("allowed over limit"),
    }
}

#[tokio::test]
#[ignore = "requires a local Redis"]
async fn window_expiry_restores_quota() {
    let store = create_test_store().await;
    let key = unique_key("expiry");
    let params = params(1, 1, None);

    assert!(store.consume(&key, &params).await.unwrap().is_allowed());
    assert!(!store.consume(&key, &params).await.unwrap().is_allowed());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(store.consume(&key, &params).await.unwrap().is_allowed());
}

#[tokio::test]
#[ignore = "requires a local Redis"]
async fn keys_are_isolated() {
    let store = create_test_store().await;
    let key_a = unique_key("iso-a");
    let key_b = unique_key("iso-b");
    let params = params(1, 60, None);

    assert!(store.consume(&key_a, &params).await.unwrap().is_allowed());
    assert!(!store.consume(&key_a, &params).await.unwrap().is_allowed());
    assert!(store.consume(&key_b, &params).await.unwrap().is_allowed());
}

#[tokio::test]
#[ignore = "requires a local Redis"]
async fn concurrent_consumers_never_lose_updates() {
    let store = create_test_store().await;
    let key = unique_key("race");
    let params = params(10, 60, None);

    let mut handles = Vec::new();
    for _ in 0..30 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            store.consume(&key, &params).await.unwrap().is_allowed()
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }

    // The Lua script serializes consumption: exactly `points` admissions.
    assert_eq!(allowed, 10);
}
