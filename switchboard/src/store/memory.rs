//! In-memory configuration store for tests and development mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use switchboard_agent::PluginRef;

use super::ConfigStore;
use crate::instance::OrchestratorInstance;
use crate::types::{Result, SwitchboardError};

/// Store backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryConfigStore {
    instances: DashMap<String, OrchestratorInstance>,
    unreachable: AtomicBool,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a store error, simulating an outage.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SwitchboardError::Store("store unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get_instance_config(&self, instance_id: &str) -> Result<OrchestratorInstance> {
        self.check()?;
        self.instances
            .get(instance_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SwitchboardError::NotFound(instance_id.to_string()))
    }

    async fn persist_instance_config(&self, instance: &OrchestratorInstance) -> Result<()> {
        self.check()?;
        let mut stored = self
            .instances
            .get_mut(&instance.instance_id)
            .ok_or_else(|| SwitchboardError::NotFound(instance.instance_id.clone()))?;

        // Recency is owned by record_access
        let last_accessed_at = stored.last_accessed_at;
        *stored = instance.clone();
        stored.last_accessed_at = last_accessed_at;
        Ok(())
    }

    async fn list_active_plugins(&self, tenant_id: &str) -> Result<Vec<PluginRef>> {
        self.check()?;
        let plugins: BTreeSet<PluginRef> = self
            .instances
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .flat_map(|entry| entry.plugins.clone())
            .collect();
        Ok(plugins.into_iter().collect())
    }

    async fn create_instance(&self, instance: &OrchestratorInstance) -> Result<()> {
        self.check()?;
        match self.instances.entry(instance.instance_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SwitchboardError::Config(format!(
                "instance {} already exists",
                instance.instance_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(instance.clone());
                Ok(())
            }
        }
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool> {
        self.check()?;
        Ok(self.instances.remove(instance_id).is_some())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        self.check()?;
        let mut accessed: Vec<(DateTime<Utc>, String)> = self
            .instances
            .iter()
            .filter_map(|entry| entry.last_accessed_at.map(|at| (at, entry.key().clone())))
            .collect();
        accessed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(accessed.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn list_all(&self) -> Result<Vec<String>> {
        self.check()?;
        let mut ids: Vec<String> = self.instances.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn record_access(&self, instance_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check()?;
        if let Some(mut stored) = self.instances.get_mut(instance_id) {
            stored.last_accessed_at = Some(at);
        }
        Ok(())
    }
}
