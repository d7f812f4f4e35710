//! Tiered instance pool.
//!
//! Instances move between three tiers:
//!
//! - **Cold**: known, nothing cached
//! - **Warm**: configuration cached
//! - **Hot**: executor built, shared resources pinned
//!
//! Promotions are single-flighted per instance and retried with backoff;
//! a hot slot is reserved once the executor is built.
//! The hot tier is bounded; when full, the least recently touched hot
//! instance without leases is demoted to warm. Every tier transition of one
//! instance runs under that instance's transition lock.

pub mod builder;
pub mod lease;
pub mod stats;
pub mod tier;

pub use builder::InstanceBuilder;
pub use lease::{ExecutorHandle, LiveInstance, ResourceSet};
pub use stats::{InstanceHealth, PoolStats, PrewarmReport, SweepReport};
pub use tier::{PoolEntry, TierState};

use dashmap::DashMap;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use switchboard_agent::plugin::PluginHealth;
use switchboard_agent::PluginRef;

use crate::config::{PoolConfig, PrewarmPolicy};
use crate::flight::SingleFlight;
use crate::hashing::config_hash;
use crate::instance::{OrchestratorInstance, Tier};
use crate::store::ConfigStore;
use crate::types::{Result, SwitchboardError};

/// Times `resolve` re-promotes an instance evicted before it could be leased
const RESOLVE_ATTEMPTS: usize = 3;

/// Concurrent promotions during prewarm
const PREWARM_CONCURRENCY: usize = 4;

/// What a reload did to the local copy.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// Not cached in this process
    NotLoaded,
    /// Local copy already matches
    Unchanged,
    /// Warm configuration replaced
    Refreshed,
    /// Hot executor rebuilt and swapped; the old one drains on `drain`
    Rebuilt {
        previous: String,
        current: String,
        drain: JoinHandle<bool>,
    },
}

/// A reserved hot slot; returned to the pool unless committed.
struct HotSlot {
    slots: Arc<AtomicUsize>,
    freed: Arc<Notify>,
    committed: bool,
}

impl HotSlot {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for HotSlot {
    fn drop(&mut self) {
        if !self.committed {
            self.slots.fetch_sub(1, Ordering::SeqCst);
            self.freed.notify_waiters();
        }
    }
}

/// Owns every instance this process serves.
pub struct PoolManager {
    entries: DashMap<String, Arc<PoolEntry>>,
    store: Arc<dyn ConfigStore>,
    builder: InstanceBuilder,
    config: PoolConfig,
    flights: SingleFlight<Result<()>>,
    /// Serializes hot-slot reservation
    capacity: Mutex<()>,
    /// Hot entries plus in-progress reservations
    hot_slots: Arc<AtomicUsize>,
    /// Notified whenever a lease ends or a hot slot frees up
    slot_freed: Arc<Notify>,
    touch_counter: AtomicU64,
}

impl PoolManager {
    pub fn new(store: Arc<dyn ConfigStore>, builder: InstanceBuilder, config: PoolConfig) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            builder,
            config,
            flights: SingleFlight::new(),
            capacity: Mutex::new(()),
            hot_slots: Arc::new(AtomicUsize::new(0)),
            slot_freed: Arc::new(Notify::new()),
            touch_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn builder(&self) -> &InstanceBuilder {
        &self.builder
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    fn entry(&self, instance_id: &str) -> Option<Arc<PoolEntry>> {
        self.entries.get(instance_id).map(|entry| entry.value().clone())
    }

    fn snapshot(&self) -> Vec<(String, Arc<PoolEntry>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn next_seq(&self) -> u64 {
        self.touch_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Lease a ready executor, promoting the instance to hot if needed.
    pub async fn resolve(&self, instance_id: &str) -> Result<ExecutorHandle> {
        for _ in 0..RESOLVE_ATTEMPTS {
            if let Some(handle) = self.try_lease(instance_id).await {
                self.touch(instance_id);
                return Ok(handle);
            }
            self.flights
                .run(instance_id, || self.promote(instance_id, Tier::Hot))
                .await?;
        }

        Err(SwitchboardError::PoolSaturated(format!(
            "{} was evicted before it could be leased",
            instance_id
        )))
    }

    async fn try_lease(&self, instance_id: &str) -> Option<ExecutorHandle> {
        let entry = self.entry(instance_id)?;
        let state = entry.state.read().await;
        let handle = state.live().map(|live| live.lease(self.slot_freed.clone()));
        handle
    }

    /// Mark an instance as just used.
    pub fn touch(&self, instance_id: &str) {
        if let Some(entry) = self.entry(instance_id) {
            entry.touch(self.next_seq());
        }
    }

    /// Bring an instance to `tier`. Cold drops cached state but keeps the
    /// instance known.
    pub async fn load(&self, instance_id: &str, tier: Tier) -> Result<()> {
        match tier {
            Tier::Cold => {
                self.demote_to_cold(instance_id).await;
                Ok(())
            }
            target => {
                self.flights
                    .run(instance_id, || self.promote(instance_id, target))
                    .await
            }
        }
    }

    async fn promote(&self, instance_id: &str, target: Tier) -> Result<()> {
        // Unknown ids are checked against the store before an entry exists
        let (entry, mut preloaded) = match self.entry(instance_id) {
            Some(entry) => (entry, None),
            None => {
                let instance = Arc::new(self.load_config(instance_id).await?);
                let seq = self.next_seq();
                let entry = self
                    .entries
                    .entry(instance_id.to_string())
                    .or_insert_with(|| Arc::new(PoolEntry::new(TierState::Cold, seq)))
                    .value()
                    .clone();
                (entry, Some(instance))
            }
        };

        let _transition = entry.transition.lock().await;
        if !self
            .entries
            .get(instance_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), &entry))
        {
            return Err(SwitchboardError::build(instance_id, "unloaded during promotion"));
        }

        let prior = entry.state.read().await.tier();
        if prior >= target {
            return Ok(());
        }

        let cached = entry.state.read().await.instance().cloned();
        let instance = match cached {
            Some(instance) => instance,
            None => {
                let instance = match preloaded.take() {
                    Some(instance) => instance,
                    None => Arc::new(self.load_config(instance_id).await?),
                };
                *entry.state.write().await = TierState::warm(instance.clone());
                debug!(instance_id = %instance_id, "Instance warmed");
                instance
            }
        };
        if target == Tier::Warm {
            return Ok(());
        }

        // Hot capacity is taken only after a successful build
        let built = match self.build_with_retry(&instance).await {
            Ok(live) => match self.reserve_hot_slot(instance_id).await {
                Ok(slot) => Ok((slot, live)),
                Err(err) => {
                    live.release_resources().await;
                    Err(err)
                }
            },
            Err(err) => Err(err),
        };

        match built {
            Ok((slot, live)) => {
                let config_hash = live.config_hash().to_string();
                *entry.state.write().await = TierState::hot(instance, live);
                slot.commit();
                info!(instance_id = %instance_id, config_hash = %config_hash, "Instance promoted to hot");
                Ok(())
            }
            Err(err) => {
                if prior == Tier::Cold {
                    *entry.state.write().await = TierState::Cold;
                }
                Err(err)
            }
        }
    }

    /// Load from the store and recompute the hash against local defaults.
    async fn load_config(&self, instance_id: &str) -> Result<OrchestratorInstance> {
        let mut instance = self.store.get_instance_config(instance_id).await?;
        let hash = config_hash(&instance, self.builder.defaults())?;
        if !instance.config_hash.is_empty() && instance.config_hash != hash {
            warn!(
                instance_id = %instance_id,
                stored = %instance.config_hash,
                computed = %hash,
                "Stored config hash differs from local computation"
            );
        }
        instance.config_hash = hash;
        Ok(instance)
    }

    async fn build_with_retry(&self, instance: &OrchestratorInstance) -> Result<Arc<LiveInstance>> {
        let policy = &self.config.retry;
        let mut backoff = policy.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.builder.build(instance).await {
                Ok(live) => return Ok(live),
                Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                    warn!(
                        instance_id = %instance.instance_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Build failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(policy.max_backoff);
                    attempt += 1;
                }
                Err(err) => {
                    error!(instance_id = %instance.instance_id, attempt, error = %err, "Build failed");
                    return Err(err);
                }
            }
        }
    }

    /// Reserve room in the hot tier, evicting or waiting as needed.
    async fn reserve_hot_slot(&self, requester: &str) -> Result<HotSlot> {
        let deadline = tokio::time::Instant::now() + self.config.capacity_wait;

        loop {
            let freed = self.slot_freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            {
                let _capacity = self.capacity.lock().await;
                if self.hot_slots.load(Ordering::SeqCst) < self.config.max_hot_pool_size
                    || self.evict_one(requester).await
                {
                    self.hot_slots.fetch_add(1, Ordering::SeqCst);
                    return Ok(HotSlot {
                        slots: self.hot_slots.clone(),
                        freed: self.slot_freed.clone(),
                        committed: false,
                    });
                }
            }

            if tokio::time::timeout_at(deadline, freed).await.is_err() {
                warn!(
                    instance_id = %requester,
                    capacity = self.config.max_hot_pool_size,
                    "Hot pool saturated"
                );
                return Err(SwitchboardError::PoolSaturated(format!(
                    "all {} hot instances are leased",
                    self.config.max_hot_pool_size
                )));
            }
        }
    }

    /// Demote the least recently touched hot instance with no leases.
    async fn evict_one(&self, requester: &str) -> bool {
        let mut candidates: Vec<(u64, String, Arc<PoolEntry>)> = self
            .entries
            .iter()
            .filter(|entry| entry.key() != requester)
            .map(|entry| (entry.touch_seq(), entry.key().clone(), entry.value().clone()))
            .collect();
        candidates.sort_by_key(|(seq, _, _)| *seq);

        for (_, instance_id, entry) in candidates {
            // An instance mid-transition is not a victim
            let Ok(_transition) = entry.transition.try_lock() else {
                continue;
            };

            let mut state = entry.state.write().await;
            if !state.live().is_some_and(|live| live.leases() == 0) {
                continue;
            }
            let Some(live) = state.demote() else {
                continue;
            };
            drop(state);

            self.hot_slots.fetch_sub(1, Ordering::SeqCst);
            live.release_resources().await;
            info!(instance_id = %instance_id, "Evicted least recently used hot instance");
            return true;
        }
        false
    }

    /// Re-read an instance from the store and apply it locally.
    ///
    /// With `expected_hash`, a local copy already at that hash is left alone.
    /// A hot instance is rebuilt in full before the swap; the old executor
    /// drains and releases its resources in the background.
    pub async fn reload(&self, instance_id: &str, expected_hash: Option<&str>) -> Result<ReloadOutcome> {
        let Some(entry) = self.entry(instance_id) else {
            return Ok(ReloadOutcome::NotLoaded);
        };
        let _transition = entry.transition.lock().await;

        let (tier, local_hash) = {
            let state = entry.state.read().await;
            (state.tier(), state.config_hash().map(str::to_string))
        };

        if let (Some(expected), Some(local)) = (expected_hash, local_hash.as_deref()) {
            if expected == local {
                debug!(instance_id = %instance_id, config_hash = %local, "Reload already applied");
                return Ok(ReloadOutcome::Unchanged);
            }
        }

        match tier {
            Tier::Cold => Ok(ReloadOutcome::NotLoaded),
            Tier::Warm => {
                let fresh = self.load_config(instance_id).await?;
                let changed = local_hash.as_deref() != Some(fresh.config_hash.as_str());
                *entry.state.write().await = TierState::warm(Arc::new(fresh));
                Ok(if changed {
                    info!(instance_id = %instance_id, "Warm configuration refreshed");
                    ReloadOutcome::Refreshed
                } else {
                    ReloadOutcome::Unchanged
                })
            }
            Tier::Hot => {
                let fresh = self.load_config(instance_id).await?;
                let current = fresh.config_hash.clone();
                let previous = local_hash.unwrap_or_default();
                if previous == current {
                    debug!(instance_id = %instance_id, config_hash = %current, "Hot executor already current");
                    return Ok(ReloadOutcome::Unchanged);
                }

                // Everything for the new version is acquired before the swap
                let live = self.build_with_retry(&fresh).await?;

                let mut state = entry.state.write().await;
                let Some(old) = state.live().cloned() else {
                    drop(state);
                    live.release_resources().await;
                    return Ok(ReloadOutcome::NotLoaded);
                };
                *state = TierState::hot(Arc::new(fresh), live);
                drop(state);

                info!(
                    instance_id = %instance_id,
                    previous = %previous,
                    current = %current,
                    "Hot executor swapped"
                );

                let drain = tokio::spawn(retire(old, self.config.drain_timeout));
                Ok(ReloadOutcome::Rebuilt {
                    previous,
                    current,
                    drain,
                })
            }
        }
    }

    /// Drain and drop an instance from every local tier.
    pub async fn unload(&self, instance_id: &str) -> bool {
        let Some(entry) = self.entry(instance_id) else {
            return false;
        };
        let _transition = entry.transition.lock().await;

        let previous = std::mem::replace(&mut *entry.state.write().await, TierState::Cold);
        self.entries
            .remove_if(instance_id, |_, current| Arc::ptr_eq(current, &entry));

        if let TierState::Hot { live, .. } = previous {
            self.hot_slots.fetch_sub(1, Ordering::SeqCst);
            self.slot_freed.notify_waiters();
            retire(live, self.config.drain_timeout).await;
        }

        info!(instance_id = %instance_id, "Instance unloaded");
        true
    }

    /// Alias of [`PoolManager::unload`] used when an instance is deleted.
    pub async fn remove(&self, instance_id: &str) -> bool {
        self.unload(instance_id).await
    }

    async fn demote_to_cold(&self, instance_id: &str) {
        let Some(entry) = self.entry(instance_id) else {
            return;
        };
        let _transition = entry.transition.lock().await;

        let previous = std::mem::replace(&mut *entry.state.write().await, TierState::Cold);
        if let TierState::Hot { live, .. } = previous {
            self.hot_slots.fetch_sub(1, Ordering::SeqCst);
            self.slot_freed.notify_waiters();
            retire(live, self.config.drain_timeout).await;
        }
        debug!(instance_id = %instance_id, "Instance demoted to cold");
    }

    /// Demote idle instances and flush access recency to the store.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport {
            access_flushed: self.flush_access().await,
            ..Default::default()
        };

        for (instance_id, entry) in self.snapshot() {
            let Ok(_transition) = entry.transition.try_lock() else {
                continue;
            };

            let idle = entry.idle_for();
            let mut state = entry.state.write().await;
            let target = match &*state {
                TierState::Hot { live, .. }
                    if live.leases() == 0 && self.config.hot_idle_ttl.is_some_and(|ttl| idle >= ttl) =>
                {
                    Some(Tier::Warm)
                }
                TierState::Warm { .. } if idle >= self.config.warm_ttl => Some(Tier::Cold),
                _ => None,
            };

            match target {
                Some(Tier::Warm) => {
                    if let Some(live) = state.demote() {
                        drop(state);
                        self.hot_slots.fetch_sub(1, Ordering::SeqCst);
                        self.slot_freed.notify_waiters();
                        live.release_resources().await;
                        report.hot_to_warm += 1;
                        debug!(instance_id = %instance_id, idle_secs = idle.as_secs(), "Idle hot instance demoted");
                    }
                }
                Some(Tier::Cold) => {
                    *state = TierState::Cold;
                    report.warm_to_cold += 1;
                    debug!(instance_id = %instance_id, idle_secs = idle.as_secs(), "Idle warm instance demoted");
                }
                _ => {}
            }
        }

        if report != SweepReport::default() {
            info!(
                hot_to_warm = report.hot_to_warm,
                warm_to_cold = report.warm_to_cold,
                access_flushed = report.access_flushed,
                "Pool sweep"
            );
        }
        report
    }

    /// Write pending access times to the store.
    pub async fn flush_access(&self) -> usize {
        let mut flushed = 0;
        for (instance_id, entry) in self.snapshot() {
            if !entry.take_dirty() {
                continue;
            }
            match self.store.record_access(&instance_id, entry.last_access()).await {
                Ok(()) => flushed += 1,
                Err(err) => {
                    entry.mark_dirty();
                    warn!(instance_id = %instance_id, error = %err, "Failed to record access");
                }
            }
        }
        flushed
    }

    /// Run the sweeper on `sweep_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = self.clone();
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.sweep().await;
            }
        })
    }

    /// Populate the hot tier according to `policy`.
    pub async fn prewarm(&self, policy: PrewarmPolicy) -> Result<PrewarmReport> {
        let limit = self.config.max_hot_pool_size;
        let ids = match policy {
            PrewarmPolicy::None => return Ok(PrewarmReport::default()),
            PrewarmPolicy::Recent(n) => self.store.list_recent(n.min(limit)).await?,
            PrewarmPolicy::All => self.store.list_all().await?,
        };

        let mut report = PrewarmReport {
            requested: ids.len().min(limit),
            ..Default::default()
        };

        let mut results = futures::stream::iter(ids.into_iter().take(limit))
            .map(|instance_id| async move {
                let result = self.load(&instance_id, Tier::Hot).await;
                (instance_id, result)
            })
            .buffer_unordered(PREWARM_CONCURRENCY);

        while let Some((instance_id, result)) = results.next().await {
            match result {
                Ok(()) => report.promoted += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(instance_id = %instance_id, error = %err, "Prewarm failed");
                }
            }
        }

        info!(
            policy = %policy,
            requested = report.requested,
            promoted = report.promoted,
            failed = report.failed,
            "Prewarm complete"
        );
        Ok(report)
    }

    /// Run plugin health checks for every hot instance.
    pub async fn health_check_all(&self) -> Vec<InstanceHealth> {
        let mut results = Vec::new();

        for (instance_id, entry) in self.snapshot() {
            let Some(live) = entry.state.read().await.live().cloned() else {
                continue;
            };

            let refs: Vec<PluginRef> = live
                .executor()
                .plugins()
                .map(|bundle| bundle.plugin_ref.clone())
                .collect();

            let mut plugins = BTreeMap::new();
            for plugin_ref in refs {
                let health = match self.builder.plugins().resolve(&plugin_ref).await {
                    Ok(factory) => factory.health_check().await,
                    Err(err) => PluginHealth::Unhealthy {
                        reason: err.to_string(),
                    },
                };
                plugins.insert(plugin_ref.to_string(), health);
            }

            let health = InstanceHealth {
                instance_id,
                config_hash: live.config_hash().to_string(),
                plugins,
            };
            if !health.is_healthy() {
                warn!(instance_id = %health.instance_id, "Instance has unhealthy plugins");
            }
            results.push(health);
        }

        results.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        results
    }

    /// Drain and release every instance.
    pub async fn shutdown(&self) -> usize {
        let flushed = self.flush_access().await;
        let ids: Vec<String> = self.snapshot().into_iter().map(|(id, _)| id).collect();
        let unloaded = futures::future::join_all(ids.iter().map(|id| self.unload(id)))
            .await
            .into_iter()
            .filter(|unloaded| *unloaded)
            .count();

        info!(unloaded, access_flushed = flushed, "Pool shut down");
        unloaded
    }

    pub async fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            hot_capacity: self.config.max_hot_pool_size,
            ..Default::default()
        };

        for (_, entry) in self.snapshot() {
            let state = entry.state.read().await;
            match &*state {
                TierState::Cold => stats.cold += 1,
                TierState::Warm { .. } => stats.warm += 1,
                TierState::Hot { live, .. } => {
                    stats.hot += 1;
                    stats.leases += live.leases();
                }
            }
        }

        stats.estimated_memory_bytes = PoolStats::estimate_memory(stats.cold, stats.warm, stats.hot);
        stats.resources = self.builder.resources().stats();
        stats
    }

    /// Hash of the local copy, if warm or hot.
    pub async fn config_hash(&self, instance_id: &str) -> Option<String> {
        let entry = self.entry(instance_id)?;
        let state = entry.state.read().await;
        state.config_hash().map(str::to_string)
    }

    /// Local tier of an instance; `None` when unknown to this process.
    pub async fn tier(&self, instance_id: &str) -> Option<Tier> {
        let entry = self.entry(instance_id)?;
        let tier = entry.state.read().await.tier();
        Some(tier)
    }

    /// Cached configuration, if warm or hot.
    pub async fn instance(&self, instance_id: &str) -> Option<Arc<OrchestratorInstance>> {
        let entry = self.entry(instance_id)?;
        let state = entry.state.read().await;
        state.instance().cloned()
    }

    /// Hot instance ids, most recently touched first.
    pub async fn hot_instances(&self) -> Vec<String> {
        let mut hot = Vec::new();
        for (instance_id, entry) in self.snapshot() {
            if entry.state.read().await.tier() == Tier::Hot {
                hot.push((entry.touch_seq(), instance_id));
            }
        }
        hot.sort_by(|a, b| b.0.cmp(&a.0));
        hot.into_iter().map(|(_, id)| id).collect()
    }
}

/// Wait for leases on a replaced executor to end, then release its resources.
async fn retire(live: Arc<LiveInstance>, timeout: Duration) -> bool {
    let drained = live.drain(timeout).await;
    if !drained {
        let err = SwitchboardError::DrainTimeout {
            instance_id: live.instance_id().to_string(),
            timeout_ms: timeout.as_millis() as u64,
            leases: live.leases(),
        };
        warn!(instance_id = %live.instance_id(), error = %err, "Forcing release of shared resources");
    }
    live.release_resources().await;
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigDefaults, RegistryConfig};
    use crate::resources::SharedResources;
    use crate::store::InMemoryConfigStore;
    use switchboard_agent::backend::MockModel;
    use switchboard_agent::{ModelClient, ModelClientFactory, ModelError, ModelSpec, PluginRegistry};

    struct MockFactory;

    impl ModelClientFactory for MockFactory {
        fn create(&self, spec: &ModelSpec) -> std::result::Result<Arc<dyn ModelClient>, ModelError> {
            Ok(Arc::new(MockModel::new(spec.model.clone())))
        }
    }

    async fn pool(max_hot: usize, ids: &[&str]) -> (Arc<PoolManager>, Arc<InMemoryConfigStore>) {
        let store = Arc::new(InMemoryConfigStore::new());
        for id in ids {
            store
                .create_instance(&OrchestratorInstance::new("t1", *id).with_id(*id))
                .await
                .unwrap();
        }
        let resources = SharedResources::new(Arc::new(MockFactory), RegistryConfig::default());
        let builder = InstanceBuilder::new(PluginRegistry::new(), resources, Arc::new(ConfigDefaults::default()));
        let config = PoolConfig {
            max_hot_pool_size: max_hot,
            capacity_wait: Duration::from_millis(50),
            ..PoolConfig::default()
        };
        (Arc::new(PoolManager::new(store.clone(), builder, config)), store)
    }

    #[tokio::test]
    async fn test_resolve_promotes_to_hot() {
        let (pool, _) = pool(2, &["a"]).await;
        assert_eq!(pool.tier("a").await, None);

        let handle = pool.resolve("a").await.unwrap();
        assert_eq!(handle.instance_id(), "a");
        assert_eq!(pool.tier("a").await, Some(Tier::Hot));
        assert_eq!(pool.stats().await.leases, 1);

        drop(handle);
        assert_eq!(pool.stats().await.leases, 0);
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let (pool, _) = pool(2, &[]).await;
        let err = pool.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, SwitchboardError::NotFound(_)));
        assert_eq!(pool.stats().await.total(), 0);
    }

    #[tokio::test]
    async fn test_load_warm_then_cold() {
        let (pool, _) = pool(2, &["a"]).await;
        pool.load("a", Tier::Warm).await.unwrap();
        assert_eq!(pool.tier("a").await, Some(Tier::Warm));
        assert!(pool.config_hash("a").await.is_some());

        pool.load("a", Tier::Cold).await.unwrap();
        assert_eq!(pool.tier("a").await, Some(Tier::Cold));
        assert!(pool.config_hash("a").await.is_none());
    }

    #[tokio::test]
    async fn test_saturated_when_every_hot_instance_is_leased() {
        let (pool, _) = pool(1, &["a", "b"]).await;
        let held = pool.resolve("a").await.unwrap();

        let err = pool.resolve("b").await.unwrap_err();
        assert!(matches!(err, SwitchboardError::PoolSaturated(_)));
        assert_eq!(pool.tier("a").await, Some(Tier::Hot));

        drop(held);
        let b = pool.resolve("b").await.unwrap();
        assert_eq!(b.instance_id(), "b");
        assert_eq!(pool.tier("a").await, Some(Tier::Warm));
    }

    #[tokio::test]
    async fn test_unload_drops_entry_and_resources() {
        let (pool, _) = pool(2, &["a"]).await;
        drop(pool.resolve("a").await.unwrap());
        assert!(pool.stats().await.resources.iter().any(|r| r.references > 0));

        assert!(pool.unload("a").await);
        assert!(!pool.unload("a").await);
        assert_eq!(pool.tier("a").await, None);
        assert!(pool.stats().await.resources.iter().all(|r| r.references == 0));
    }

    #[tokio::test]
    async fn test_sweep_demotes_idle_instances() {
        let (pool, store) = pool(2, &["a"]).await;
        let mut config = pool.config().clone();
        config.hot_idle_ttl = Some(Duration::ZERO);
        config.warm_ttl = Duration::ZERO;
        let pool = PoolManager::new(store.clone(), pool.builder().clone(), config);

        drop(pool.resolve("a").await.unwrap());

        let first = pool.sweep().await;
        assert_eq!(first.hot_to_warm, 1);
        assert_eq!(first.access_flushed, 1);
        assert!(store.get_instance_config("a").await.unwrap().last_accessed_at.is_some());

        let second = pool.sweep().await;
        assert_eq!(second.warm_to_cold, 1);
        assert_eq!(pool.tier("a").await, Some(Tier::Cold));
    }

    #[tokio::test]
    async fn test_store_outage_fails_request_only() {
        let (pool, store) = pool(2, &["a", "b"]).await;
        drop(pool.resolve("a").await.unwrap());

        store.set_unreachable(true);
        assert!(matches!(pool.resolve("b").await, Err(SwitchboardError::Store(_))));
        // Already hot: served without the store
        assert!(pool.resolve("a").await.is_ok());
    }
}
