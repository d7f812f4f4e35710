//! Configuration changes: validate, hash, persist, broadcast.
//!
//! The detector never touches a pool directly. Every process, including the
//! one that made the change, applies it from the reload event it receives.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use switchboard_agent::plugin::PluginMetadata;
use switchboard_agent::{GraphTemplate, PluginRef};

use crate::hashing::EffectiveConfig;
use crate::instance::{OrchestratorInstance, Tier};
use crate::pool::InstanceBuilder;
use crate::reload::{ReloadBroker, ReloadEvent};
use crate::store::ConfigStore;
use crate::types::{Result, SwitchboardError};

/// Result of a configuration update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    /// Effective configuration identical to the stored one; nothing written
    Unchanged { hash: String },
    /// Persisted and broadcast
    Updated { previous: String, hash: String },
}

impl ConfigChange {
    pub fn hash(&self) -> &str {
        match self {
            ConfigChange::Unchanged { hash } | ConfigChange::Updated { hash, .. } => hash,
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, ConfigChange::Updated { .. })
    }
}

/// Turns configuration writes into reload events.
pub struct ChangeDetector {
    store: Arc<dyn ConfigStore>,
    broker: Arc<dyn ReloadBroker>,
    builder: InstanceBuilder,
    node_id: String,
}

impl ChangeDetector {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        broker: Arc<dyn ReloadBroker>,
        builder: InstanceBuilder,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broker,
            builder,
            node_id: node_id.into(),
        }
    }

    /// Validate `instance` and return its config hash.
    ///
    /// Checks that every plugin resolves, accepts its settings, and that the
    /// framework/mode and plugin route names form a valid graph.
    pub async fn validate(&self, instance: &OrchestratorInstance) -> Result<String> {
        let id = instance.instance_id.as_str();
        let effective = EffectiveConfig::resolve(instance, self.builder.defaults());
        let factories = self.builder.resolve_plugins(id, &effective).await?;

        let described: Vec<(PluginRef, PluginMetadata)> = factories
            .iter()
            .map(|(plugin_ref, factory)| (plugin_ref.clone(), factory.metadata().clone()))
            .collect();
        GraphTemplate::compile(&effective.framework, &effective.mode, &described)
            .map_err(|e| SwitchboardError::from_graph(id, e))?;

        effective.hash()
    }

    /// Apply an updated configuration.
    ///
    /// Framework and mode are immutable. An update whose effective
    /// configuration hashes to the stored hash is a no-op.
    pub async fn update(&self, instance: &OrchestratorInstance) -> Result<ConfigChange> {
        let id = instance.instance_id.as_str();
        let current = self.store.get_instance_config(id).await?;

        if current.framework != instance.framework || current.mode != instance.mode {
            return Err(SwitchboardError::Config(format!(
                "framework/mode of {} cannot change ({}/{} -> {}/{})",
                id, current.framework, current.mode, instance.framework, instance.mode
            )));
        }

        let hash = self.validate(instance).await?;
        let previous = if current.config_hash.is_empty() {
            EffectiveConfig::resolve(&current, self.builder.defaults()).hash()?
        } else {
            current.config_hash.clone()
        };

        if previous == hash {
            debug!(instance_id = %id, config_hash = %hash, "Config update is a no-op");
            return Ok(ConfigChange::Unchanged { hash });
        }

        let mut updated = instance.clone();
        updated.tenant_id = current.tenant_id.clone();
        updated.config_hash = hash.clone();
        updated.tier = current.tier;
        updated.created_at = current.created_at;
        updated.last_accessed_at = current.last_accessed_at;
        updated.updated_at = Utc::now();
        self.store.persist_instance_config(&updated).await?;

        info!(instance_id = %id, previous = %previous, config_hash = %hash, "Instance config updated");
        self.publish(ReloadEvent::reload(&updated, &self.node_id)).await;

        Ok(ConfigChange::Updated { previous, hash })
    }

    /// Validate, hash and persist a new instance. A load event is broadcast
    /// when `tier` is above Cold.
    pub async fn create(&self, instance: OrchestratorInstance, tier: Tier) -> Result<OrchestratorInstance> {
        let hash = self.validate(&instance).await?;

        let now = Utc::now();
        let mut created = instance;
        created.config_hash = hash;
        created.tier = tier;
        created.created_at = now;
        created.updated_at = now;
        created.last_accessed_at = None;
        self.store.create_instance(&created).await?;

        info!(
            instance_id = %created.instance_id,
            tenant_id = %created.tenant_id,
            config_hash = %created.config_hash,
            tier = %tier,
            "Instance created"
        );

        if tier != Tier::Cold {
            self.publish(ReloadEvent::load(&created, tier, &self.node_id)).await;
        }
        Ok(created)
    }

    /// Delete an instance from the store and broadcast an unload.
    pub async fn delete(&self, instance_id: &str) -> Result<bool> {
        let instance = match self.store.get_instance_config(instance_id).await {
            Ok(instance) => instance,
            Err(SwitchboardError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let deleted = self.store.delete_instance(instance_id).await?;
        if deleted {
            info!(instance_id = %instance_id, "Instance deleted");
            self.publish(ReloadEvent::unload(&instance, &self.node_id)).await;
        }
        Ok(deleted)
    }

    /// Broadcast a load command for an existing instance.
    pub async fn request_load(&self, instance_id: &str, tier: Tier) -> Result<()> {
        let instance = self.store.get_instance_config(instance_id).await?;
        self.broker
            .publish(&ReloadEvent::load(&instance, tier, &self.node_id))
            .await
    }

    /// Broadcast an unload command for an existing instance.
    pub async fn request_unload(&self, instance_id: &str) -> Result<()> {
        let instance = self.store.get_instance_config(instance_id).await?;
        self.broker
            .publish(&ReloadEvent::unload(&instance, &self.node_id))
            .await
    }

    /// Publish after a committed write. The write stands if the broadcast
    /// fails; other processes converge on their next reload or promotion.
    async fn publish(&self, event: ReloadEvent) {
        if let Err(e) = self.broker.publish(&event).await {
            warn!(
                instance_id = %event.instance_id,
                action = %event.action,
                error = %e,
                "Failed to broadcast reload event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigDefaults, RegistryConfig};
    use crate::instance::{InstanceConfig, ModelSelector};
    use crate::reload::{InMemoryBroker, ReloadAction};
    use crate::resources::SharedResources;
    use crate::store::InMemoryConfigStore;
    use futures::StreamExt;
    use switchboard_agent::backend::MockModel;
    use switchboard_agent::plugin::ToolPlugin;
    use switchboard_agent::{ModelClient, ModelClientFactory, ModelError, ModelSpec, PluginRegistry};

    struct MockFactory;

    impl ModelClientFactory for MockFactory {
        fn create(&self, spec: &ModelSpec) -> std::result::Result<Arc<dyn ModelClient>, ModelError> {
            Ok(Arc::new(MockModel::new(spec.model.clone())))
        }
    }

    async fn detector() -> (ChangeDetector, Arc<InMemoryConfigStore>, Arc<InMemoryBroker>) {
        let plugins = PluginRegistry::new();
        plugins
            .register(Arc::new(ToolPlugin::new(
                PluginMetadata::new("math", "math", "Arithmetic"),
                "You solve arithmetic.",
            )))
            .await;
        let builder = InstanceBuilder::new(
            plugins,
            SharedResources::new(Arc::new(MockFactory), RegistryConfig::default()),
            Arc::new(ConfigDefaults::default()),
        );
        let store = Arc::new(InMemoryConfigStore::new());
        let broker = Arc::new(InMemoryBroker::default());
        let detector = ChangeDetector::new(store.clone(), broker.clone(), builder, "node-a");
        (detector, store, broker)
    }

    fn bot() -> OrchestratorInstance {
        OrchestratorInstance::new("t1", "bot")
            .with_id("i1")
            .with_plugin("math".parse().unwrap())
    }

    #[tokio::test]
    async fn test_create_persists_hash_and_announces_hot() {
        let (detector, store, broker) = detector().await;
        let mut events = broker.subscribe().await.unwrap();

        let created = detector.create(bot(), Tier::Hot).await.unwrap();
        assert_eq!(created.config_hash.len(), 64);
        assert_eq!(store.get_instance_config("i1").await.unwrap().config_hash, created.config_hash);

        let event = events.next().await.unwrap();
        assert_eq!(event.action, ReloadAction::Load { tier: Tier::Hot });
        assert_eq!(event.origin, "node-a");
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_plugin() {
        let (detector, store, _) = detector().await;
        let instance = bot().with_plugin("weather".parse().unwrap());

        let err = detector.create(instance, Tier::Cold).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::Config(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_identical_update_is_noop() {
        let (detector, _, broker) = detector().await;
        let created = detector.create(bot(), Tier::Cold).await.unwrap();
        let mut events = broker.subscribe().await.unwrap();

        // Duplicate plugin and reordering do not change the effective config
        let same = created.clone().with_plugin("math@latest".parse().unwrap());
        let change = detector.update(&same).await.unwrap();
        assert_eq!(
            change,
            ConfigChange::Unchanged {
                hash: created.config_hash.clone()
            }
        );

        let changed = created.clone().with_config(
            InstanceConfig::default().with_default_model(ModelSelector::model("gpt-4o")),
        );
        let change = detector.update(&changed).await.unwrap();
        assert!(change.is_updated());
        assert_ne!(change.hash(), created.config_hash);

        let event = events.next().await.unwrap();
        assert_eq!(event.action, ReloadAction::Reload);
        assert_eq!(event.config_hash, change.hash());
    }

    #[tokio::test]
    async fn test_framework_is_immutable() {
        let (detector, _, _) = detector().await;
        let created = detector.create(bot(), Tier::Cold).await.unwrap();

        let moved = created.with_selectors("graph", "pipeline");
        assert!(matches!(
            detector.update(&moved).await,
            Err(SwitchboardError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_announces_unload() {
        let (detector, store, broker) = detector().await;
        detector.create(bot(), Tier::Cold).await.unwrap();
        let mut events = broker.subscribe().await.unwrap();

        assert!(detector.delete("i1").await.unwrap());
        assert!(!detector.delete("i1").await.unwrap());
        assert!(store.is_empty());
        assert_eq!(events.next().await.unwrap().action, ReloadAction::Unload);
    }
}
