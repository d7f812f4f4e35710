mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use common::{harness, math_bot};
use switchboard::config::PrewarmPolicy;
use switchboard::store::ConfigStore;
use switchboard::{SwitchboardError, Tier};
use switchboard_agent::plugin::{PluginMetadata, ToolPlugin};

#[tokio::test]
async fn test_concurrent_resolves_build_once() {
    let h = harness(4, false).await;
    h.store.create_instance(&math_bot("bot")).await.unwrap();

    let handles = futures::future::join_all((0..16).map(|_| {
        let pool = h.pool.clone();
        tokio::spawn(async move { pool.resolve("bot").await })
    }))
    .await;

    let mut hashes = Vec::new();
    for handle in handles {
        let lease = handle.unwrap().unwrap();
        hashes.push(lease.config_hash().to_string());
    }
    hashes.dedup();
    assert_eq!(hashes.len(), 1);

    // Stateful plugin: one agent per build
    assert_eq!(h.math.agents(), 1);
    assert_eq!(h.pool.stats().await.hot, 1);
}

#[tokio::test]
async fn test_hot_tier_bounded_with_lru_eviction() {
    let h = harness(2, true).await;
    for id in ["a", "b", "c"] {
        h.store.create_instance(&math_bot(id)).await.unwrap();
    }

    drop(h.pool.resolve("a").await.unwrap());
    drop(h.pool.resolve("b").await.unwrap());
    // a becomes the most recently touched
    drop(h.pool.resolve("a").await.unwrap());

    drop(h.pool.resolve("c").await.unwrap());

    let stats = h.pool.stats().await;
    assert_eq!(stats.hot, 2);
    assert_eq!(h.pool.tier("b").await, Some(Tier::Warm));
    assert_eq!(h.pool.hot_instances().await, vec!["c".to_string(), "a".to_string()]);
}

#[tokio::test]
async fn test_leased_instance_is_never_evicted() {
    let h = harness(2, true).await;
    for id in ["a", "b", "c"] {
        h.store.create_instance(&math_bot(id)).await.unwrap();
    }

    // a is least recently touched but stays leased
    let held = h.pool.resolve("a").await.unwrap();
    drop(h.pool.resolve("b").await.unwrap());

    let c = h.pool.resolve("c").await.unwrap();
    assert_eq!(c.instance_id(), "c");
    assert_eq!(h.pool.tier("a").await, Some(Tier::Hot));
    assert_eq!(h.pool.tier("b").await, Some(Tier::Warm));

    // Both hot instances leased: the next promotion waits, then saturates
    let err = h.pool.resolve("b").await.unwrap_err();
    assert!(matches!(err, SwitchboardError::PoolSaturated(_)));
    assert!(h.pool.stats().await.hot <= 2);

    drop(held);
    drop(c);
}

#[tokio::test]
async fn test_waiting_promotion_takes_freed_slot() {
    let h = harness(1, true).await;
    for id in ["a", "b"] {
        h.store.create_instance(&math_bot(id)).await.unwrap();
    }

    let held = h.pool.resolve("a").await.unwrap();
    let pool = h.pool.clone();
    let waiter = tokio::spawn(async move { pool.resolve("b").await.map(|lease| lease.instance_id().to_string()) });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    drop(held);

    assert_eq!(waiter.await.unwrap().unwrap(), "b");
    assert_eq!(h.pool.tier("a").await, Some(Tier::Warm));
}

#[tokio::test]
async fn test_build_failure_keeps_prior_tier_and_is_not_cached() {
    let h = harness(2, true).await;
    let bot = math_bot("bot").with_plugin("weather".parse().unwrap());
    h.store.create_instance(&bot).await.unwrap();

    let err = h.pool.resolve("bot").await.unwrap_err();
    assert!(matches!(err, SwitchboardError::Config(_)));
    assert_eq!(h.pool.tier("bot").await, Some(Tier::Cold));

    h.builder
        .plugins()
        .register(Arc::new(ToolPlugin::new(
            PluginMetadata::new("weather", "weather", "Forecasts"),
            "You report the weather.",
        )))
        .await;

    let lease = h.pool.resolve("bot").await.unwrap();
    assert_eq!(lease.executor().plugins().count(), 2);
}

#[tokio::test]
async fn test_prewarm_recent_promotes_most_recent() {
    let h = harness(5, true).await;
    let now = Utc::now();
    for (i, id) in ["old", "mid", "new"].iter().enumerate() {
        h.store.create_instance(&math_bot(id)).await.unwrap();
        h.store
            .record_access(id, now - ChronoDuration::minutes(10 - i as i64))
            .await
            .unwrap();
    }

    let report = h.pool.prewarm(PrewarmPolicy::Recent(2)).await.unwrap();
    assert_eq!(report.requested, 2);
    assert_eq!(report.promoted, 2);
    assert_eq!(h.pool.tier("new").await, Some(Tier::Hot));
    assert_eq!(h.pool.tier("mid").await, Some(Tier::Hot));
    assert_eq!(h.pool.tier("old").await, None);
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let h = harness(3, true).await;
    for id in ["a", "b"] {
        h.store.create_instance(&math_bot(id)).await.unwrap();
        drop(h.pool.resolve(id).await.unwrap());
    }
    h.pool.load("a", Tier::Cold).await.unwrap();

    assert_eq!(h.pool.shutdown().await, 2);
    let stats = h.pool.stats().await;
    assert_eq!(stats.total(), 0);
    assert!(stats.resources.iter().all(|r| r.references == 0));
}
