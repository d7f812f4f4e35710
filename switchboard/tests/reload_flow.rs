mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{harness, math_bot, Harness};
use futures::StreamExt;
use switchboard::config::PoolConfig;
use switchboard::hashing::EffectiveConfig;
use switchboard::instance::{ModelSelector, NodeOverride};
use switchboard::reload::{ReloadBroker, ReloadConsumer};
use switchboard::store::ConfigStore;
use switchboard::{OrchestratorInstance, PoolManager, ReloadEvent, ReloadOutcome, Tier};
use switchboard_agent::{GraphTemplate, ModelSpec};

/// Poll until `check` holds, for up to two seconds.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn with_coordinator(instance: &OrchestratorInstance, model: &str) -> OrchestratorInstance {
    let mut updated = instance.clone();
    updated.config.nodes.insert(
        "coordinator".to_string(),
        NodeOverride {
            model: Some(ModelSelector::model(model)),
            prompt_override: None,
        },
    );
    updated
}

fn model_spec(h: &Harness, instance: &OrchestratorInstance, node: &str) -> ModelSpec {
    EffectiveConfig::resolve(instance, h.builder.defaults())
        .model_for(node)
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn test_duplicate_reload_event_rebuilds_once() {
    let h = harness(4, false).await;
    let created = h.service.create_instance(math_bot("bot"), Tier::Cold).await.unwrap();
    drop(h.pool.resolve("bot").await.unwrap());
    assert_eq!(h.math.agents(), 1);

    let mut observed = h.broker.subscribe().await.unwrap();
    ReloadConsumer::new(h.pool.clone(), h.broker.clone())
        .spawn()
        .await
        .unwrap();

    let change = h
        .service
        .update_instance(&with_coordinator(&created, "coord-v2"))
        .await
        .unwrap();
    let event = observed.next().await.unwrap();
    assert_eq!(event.config_hash, change.hash());

    // At-least-once delivery: the same event arrives again
    h.broker.publish(&event).await.unwrap();

    let expected = change.hash().to_string();
    assert!(
        eventually(|| {
            let pool = h.pool.clone();
            let expected = expected.clone();
            async move { pool.config_hash("bot").await.as_deref() == Some(expected.as_str()) }
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.math.agents(), 2);
}

#[tokio::test]
async fn test_rebuild_leaves_unaffected_refcounts_unchanged() {
    let h = harness(4, true).await;
    let a = math_bot("a");
    let b = math_bot("b");
    for instance in [&a, &b] {
        h.store.create_instance(instance).await.unwrap();
        drop(h.pool.resolve(&instance.instance_id).await.unwrap());
    }

    let finalizer = model_spec(&h, &a, "finalizer");
    let math = model_spec(&h, &a, "math");
    let coordinator = model_spec(&h, &a, "coordinator");
    let template_key = GraphTemplate::cache_key(&a.framework, &a.mode, &a.plugins);
    assert_eq!(h.resources.models.refcount(&finalizer), Some(2));
    assert_eq!(h.resources.models.refcount(&coordinator), Some(2));
    assert_eq!(h.resources.templates.refcount(&template_key), Some(2));

    let updated = with_coordinator(&a, "coord-v2");
    h.store.persist_instance_config(&updated).await.unwrap();

    let ReloadOutcome::Rebuilt { drain, .. } = h.pool.reload("a", None).await.unwrap() else {
        panic!("expected a rebuild");
    };
    assert!(drain.await.unwrap());

    assert_eq!(h.resources.models.refcount(&finalizer), Some(2));
    assert_eq!(h.resources.models.refcount(&math), Some(2));
    assert_eq!(h.resources.templates.refcount(&template_key), Some(2));
    assert_eq!(h.resources.models.refcount(&coordinator), Some(1));
    assert_eq!(
        h.resources.models.refcount(&model_spec(&h, &updated, "coordinator")),
        Some(1)
    );
}

#[tokio::test]
async fn test_in_flight_lease_keeps_old_executor_until_drained() {
    let h = harness(4, true).await;
    let a = math_bot("a");
    h.store.create_instance(&a).await.unwrap();

    let old = h.pool.resolve("a").await.unwrap();
    let old_hash = old.config_hash().to_string();

    h.store
        .persist_instance_config(&with_coordinator(&a, "coord-v2"))
        .await
        .unwrap();
    let ReloadOutcome::Rebuilt { previous, current, drain } = h.pool.reload("a", None).await.unwrap() else {
        panic!("expected a rebuild");
    };
    assert_eq!(previous, old_hash);

    let new = h.pool.resolve("a").await.unwrap();
    assert_eq!(new.config_hash(), current);
    assert_eq!(old.config_hash(), old_hash);
    assert!(!drain.is_finished());

    drop(old);
    assert!(drain.await.unwrap());

    // Same hash again is a no-op
    assert!(matches!(
        h.pool.reload("a", Some(current.as_str())).await.unwrap(),
        ReloadOutcome::Unchanged
    ));
}

#[tokio::test]
async fn test_drain_timeout_forces_release() {
    let h = harness(4, true).await;
    let config = PoolConfig {
        drain_timeout: Duration::from_millis(50),
        ..PoolConfig::default()
    };
    let pool = Arc::new(PoolManager::new(h.store.clone(), h.builder.clone(), config));

    let a = math_bot("a");
    h.store.create_instance(&a).await.unwrap();
    let held = pool.resolve("a").await.unwrap();
    let coordinator = model_spec(&h, &a, "coordinator");

    h.store
        .persist_instance_config(&with_coordinator(&a, "coord-v2"))
        .await
        .unwrap();
    let ReloadOutcome::Rebuilt { drain, .. } = pool.reload("a", None).await.unwrap() else {
        panic!("expected a rebuild");
    };

    assert!(!drain.await.unwrap());
    assert_eq!(h.resources.models.refcount(&coordinator), Some(0));
    drop(held);
}

#[tokio::test]
async fn test_warm_reload_refreshes_cached_config() {
    let h = harness(4, true).await;
    let a = math_bot("a");
    h.store.create_instance(&a).await.unwrap();
    h.pool.load("a", Tier::Warm).await.unwrap();
    let before = h.pool.config_hash("a").await.unwrap();

    assert!(matches!(
        h.pool.reload("a", None).await.unwrap(),
        ReloadOutcome::Unchanged
    ));

    h.store
        .persist_instance_config(&with_coordinator(&a, "coord-v2"))
        .await
        .unwrap();
    assert!(matches!(
        h.pool.reload("a", None).await.unwrap(),
        ReloadOutcome::Refreshed
    ));
    assert_ne!(h.pool.config_hash("a").await.unwrap(), before);
    assert_eq!(h.pool.tier("a").await, Some(Tier::Warm));

    assert!(matches!(
        h.pool.reload("unknown", None).await.unwrap(),
        ReloadOutcome::NotLoaded
    ));
}

#[tokio::test]
async fn test_load_and_unload_commands_reach_the_pool() {
    let h = harness(4, true).await;
    h.service.create_instance(math_bot("bot"), Tier::Cold).await.unwrap();
    ReloadConsumer::new(h.pool.clone(), h.broker.clone())
        .spawn()
        .await
        .unwrap();

    h.service.load("bot", Tier::Hot).await.unwrap();
    assert!(
        eventually(|| {
            let pool = h.pool.clone();
            async move { pool.tier("bot").await == Some(Tier::Hot) }
        })
        .await
    );

    h.service.unload("bot").await.unwrap();
    assert!(
        eventually(|| {
            let pool = h.pool.clone();
            async move { pool.tier("bot").await.is_none() }
        })
        .await
    );
    assert!(h.pool.stats().await.resources.iter().all(|r| r.references == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_events_for_one_instance_apply_in_publish_order() {
    let h = harness(32, false).await;
    let mut bots = Vec::new();
    for i in 0..20 {
        let bot = math_bot(&format!("bot-{}", i));
        bots.push(h.service.create_instance(bot, Tier::Cold).await.unwrap());
    }
    ReloadConsumer::new(h.pool.clone(), h.broker.clone())
        .spawn()
        .await
        .unwrap();

    for bot in &bots {
        h.broker
            .publish(&ReloadEvent::load(bot, Tier::Hot, "node-test"))
            .await
            .unwrap();
        h.broker
            .publish(&ReloadEvent::unload(bot, "node-test"))
            .await
            .unwrap();
    }

    // Every load built its executor, and every unload ran after it
    assert!(
        eventually(|| {
            let math = h.math.clone();
            async move { math.agents() == 20 }
        })
        .await
    );
    assert!(
        eventually(|| {
            let pool = h.pool.clone();
            async move { pool.stats().await.total() == 0 }
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = h.pool.stats().await;
    assert_eq!(stats.total(), 0);
    assert!(stats.resources.iter().all(|r| r.references == 0));
}
