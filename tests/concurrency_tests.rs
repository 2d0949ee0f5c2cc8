mod common;

use common::{engine_with, quiet_config, FlakyBackend};
use std::sync::Arc;
use tiercache::CacheEngine;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_then_set_accounts_every_lookup() {
    let engine: Arc<CacheEngine<u64>> = Arc::new(engine_with(quiet_config(), FlakyBackend::new()));

    let mut handles = Vec::new();
    for task in 0..100u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..1000u64 {
                let current = engine.get("shared_counter", 0).await;
                engine
                    .set("shared_counter", current.max(task * 1000 + i), None)
                    .await
                    .unwrap();
            }
        }));
    }

    for result in futures::future::join_all(handles).await {
        result.unwrap();
    }

    let snapshot = engine.metrics_snapshot().await;
    assert_eq!(snapshot.total_hits() + snapshot.misses, 100_000);
    assert_eq!(snapshot.total_requests, 100_000);
    assert!(snapshot.misses <= 100);
    assert_eq!(snapshot.tier_sizes[&tiercache::Tier::Hot], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_keys_respect_capacity() {
    let mut config = quiet_config();
    config.hot.capacity = 64;
    let engine: Arc<CacheEngine<String>> = Arc::new(engine_with(config, FlakyBackend::new()));

    let handles: Vec<_> = (0..16)
        .map(|task| {
            let engine = engine.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    let key = format!("task{}:item{}", task, i);
                    engine.set(&key, key.clone(), None).await.unwrap();
                    assert_eq!(engine.get(&key, String::new()).await, key);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = engine.metrics_snapshot().await;
    assert_eq!(snapshot.tier_sizes[&tiercache::Tier::Hot], 64);
    // Warm hits promoted back into Hot can add evictions beyond the inserts
    assert!(snapshot.evictions >= 1600 - 64);
}
