//! Assembles executors from instance configuration and shared resources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use switchboard_agent::graph::template::{COORDINATOR, FINALIZER, SUSPEND};
use switchboard_agent::plugin::PluginMetadata;
use switchboard_agent::{GraphExecutor, ModelClient, NodeModels, PluginFactory, PluginRef, PluginRegistry};

use super::lease::{LiveInstance, ResourceSet};
use crate::config::ConfigDefaults;
use crate::hashing::EffectiveConfig;
use crate::instance::OrchestratorInstance;
use crate::resources::{ModelHandle, ModelRegistry, SharedResources};
use crate::types::{Result, SwitchboardError};

/// Builds [`LiveInstance`]s.
///
/// Every resource for the new executor is acquired before it is returned; on
/// failure the handles acquired so far are dropped, releasing them.
#[derive(Clone)]
pub struct InstanceBuilder {
    plugins: PluginRegistry,
    resources: SharedResources,
    defaults: Arc<ConfigDefaults>,
}

impl InstanceBuilder {
    pub fn new(plugins: PluginRegistry, resources: SharedResources, defaults: Arc<ConfigDefaults>) -> Self {
        Self {
            plugins,
            resources,
            defaults,
        }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn resources(&self) -> &SharedResources {
        &self.resources
    }

    pub fn defaults(&self) -> &ConfigDefaults {
        &self.defaults
    }

    /// Build a hot executor for `instance`.
    pub async fn build(&self, instance: &OrchestratorInstance) -> Result<Arc<LiveInstance>> {
        let started = Instant::now();
        let id = instance.instance_id.as_str();
        let effective = EffectiveConfig::resolve(instance, &self.defaults);
        let config_hash = effective.hash()?;

        let factories = self.resolve_plugins(id, &effective).await?;

        // One handle per distinct model, however many nodes share it
        let mut models: HashMap<String, ModelHandle> = HashMap::new();
        let mut node_keys: HashMap<String, String> = HashMap::new();
        for (node, spec) in &effective.models {
            let key = ModelRegistry::key(spec);
            if !models.contains_key(&key) {
                let handle = self.resources.models.acquire(spec).await?;
                models.insert(key.clone(), handle);
            }
            node_keys.insert(node.clone(), key);
        }
        let model_for = |node: &str| -> Result<(String, Arc<dyn ModelClient>)> {
            node_keys
                .get(node)
                .and_then(|key| models.get(key).map(|handle| (key.clone(), handle.value())))
                .ok_or_else(|| SwitchboardError::build(id, format!("no model resolved for node '{}'", node)))
        };

        let described: Vec<(PluginRef, PluginMetadata)> = factories
            .iter()
            .map(|(plugin_ref, factory)| (plugin_ref.clone(), factory.metadata().clone()))
            .collect();
        let template = self
            .resources
            .templates
            .acquire(&effective.framework, &effective.mode, &described)
            .await?;

        let mut bundles = Vec::with_capacity(factories.len());
        for (plugin_ref, factory) in &factories {
            let (model_key, model) = model_for(&plugin_ref.pid)?;
            let settings = effective.settings_for(&plugin_ref.pid);
            let bundle = self
                .resources
                .bundles
                .acquire(plugin_ref, factory.clone(), &settings, &model_key, model)
                .await?;
            bundles.push(bundle);
        }

        let node_models = NodeModels {
            coordinator: model_for(COORDINATOR)?.1,
            suspend: model_for(SUSPEND)?.1,
            finalizer: model_for(FINALIZER)?.1,
        };

        let executor = GraphExecutor::new(
            template.value(),
            node_models,
            bundles.iter().map(|b| b.bundle()).collect(),
            effective.executor.clone(),
        )
        .map_err(|e| SwitchboardError::from_graph(id, e))?
        .with_prompts(effective.prompt_overrides());

        let resources = ResourceSet {
            models,
            template,
            bundles,
        };

        info!(
            instance_id = %id,
            config_hash = %config_hash,
            plugins = factories.len(),
            references = resources.references(),
            build_ms = started.elapsed().as_millis() as u64,
            "Executor built"
        );

        Ok(Arc::new(LiveInstance::new(id, config_hash, executor, resources)))
    }

    /// Resolve and validate every active plugin.
    pub async fn resolve_plugins(
        &self,
        instance_id: &str,
        effective: &EffectiveConfig,
    ) -> Result<Vec<(PluginRef, Arc<dyn PluginFactory>)>> {
        let mut factories = Vec::with_capacity(effective.plugins.len());
        for plugin_ref in &effective.plugins {
            let factory = self
                .plugins
                .resolve(plugin_ref)
                .await
                .map_err(|e| SwitchboardError::from_plugin(instance_id, e))?;
            factory
                .validate(&effective.settings_for(&plugin_ref.pid))
                .map_err(|e| SwitchboardError::from_plugin(instance_id, e))?;
            debug!(instance_id = %instance_id, plugin = %plugin_ref, "Plugin resolved");
            factories.push((plugin_ref.clone(), factory));
        }
        Ok(factories)
    }
}
