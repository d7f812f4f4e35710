//! Effective configuration and config hashing.
//!
//! An instance's stored configuration is sparse: unset values fall through to
//! process defaults. [`EffectiveConfig`] resolves every fall-through, sorts
//! and deduplicates the plugin set, and fixes key order, so two instances that
//! behave identically serialize to identical bytes. The SHA-256 of that
//! canonical JSON is the config hash.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use switchboard_agent::graph::template::{COORDINATOR, FINALIZER, SUSPEND};
use switchboard_agent::graph::{PromptOverrides, RoleTimeouts};
use switchboard_agent::{ExecutorSettings, ModelSpec, PluginRef};

use crate::config::ConfigDefaults;
use crate::instance::{ExecutorLimits, ModelSelector, OrchestratorInstance};
use crate::types::{Result, SwitchboardError};

/// Executor-owned nodes that bind their own model.
pub const NODE_ROLES: [&str; 3] = [COORDINATOR, SUSPEND, FINALIZER];

/// Fully resolved configuration of one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub framework: String,
    pub mode: String,
    /// Sorted, deduplicated
    pub plugins: Vec<PluginRef>,
    /// Model per node role and per plugin id
    pub models: BTreeMap<String, ModelSpec>,
    pub prompts: BTreeMap<String, String>,
    /// Non-null settings of active plugins
    pub plugin_settings: BTreeMap<String, serde_json::Value>,
    pub executor: ExecutorSettings,
}

impl EffectiveConfig {
    /// Resolve `instance` against process defaults.
    pub fn resolve(instance: &OrchestratorInstance, defaults: &ConfigDefaults) -> Self {
        let config = &instance.config;

        let mut plugins = instance.plugins.clone();
        plugins.sort();
        plugins.dedup();

        let base = apply_selector(defaults.model.clone(), &config.default_model);
        let node_model = |node: &str| match config.nodes.get(node).and_then(|n| n.model.as_ref()) {
            Some(selector) => apply_selector(base.clone(), selector),
            None => base.clone(),
        };

        let mut models = BTreeMap::new();
        for role in NODE_ROLES {
            models.insert(role.to_string(), node_model(role));
        }
        for plugin in &plugins {
            models.insert(plugin.pid.clone(), node_model(&plugin.pid));
        }

        let prompts = NODE_ROLES
            .iter()
            .filter_map(|role| {
                config
                    .nodes
                    .get(*role)
                    .and_then(|n| n.prompt_override.clone())
                    .map(|prompt| (role.to_string(), prompt))
            })
            .collect();

        let plugin_settings = plugins
            .iter()
            .filter_map(|plugin| {
                config
                    .plugin_settings
                    .get(&plugin.pid)
                    .filter(|settings| !settings.is_null())
                    .map(|settings| (plugin.pid.clone(), settings.clone()))
            })
            .collect();

        Self {
            framework: instance.framework.clone(),
            mode: instance.mode.clone(),
            plugins,
            models,
            prompts,
            plugin_settings,
            executor: apply_limits(defaults.executor.clone(), &config.limits),
        }
    }

    /// Model bound to `node` (a role or plugin id).
    pub fn model_for(&self, node: &str) -> Option<&ModelSpec> {
        self.models.get(node)
    }

    /// Settings passed to plugin `pid`.
    pub fn settings_for(&self, pid: &str) -> serde_json::Value {
        self.plugin_settings
            .get(pid)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn prompt_overrides(&self) -> PromptOverrides {
        PromptOverrides {
            coordinator: self.prompts.get(COORDINATOR).cloned(),
            suspend: self.prompts.get(SUSPEND).cloned(),
            finalizer: self.prompts.get(FINALIZER).cloned(),
        }
    }

    /// Canonical bytes of this configuration.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SwitchboardError::Config(format!("Failed to canonicalize config: {}", e)))
    }

    /// Hex SHA-256 of the canonical bytes.
    pub fn hash(&self) -> Result<String> {
        Ok(hex::encode(Sha256::digest(self.canonical_bytes()?)))
    }
}

/// Hash of `instance`'s effective configuration.
pub fn config_hash(instance: &OrchestratorInstance, defaults: &ConfigDefaults) -> Result<String> {
    EffectiveConfig::resolve(instance, defaults).hash()
}

/// Short stable digest of a JSON value, used in resource keys.
pub fn digest_json(value: &serde_json::Value) -> String {
    // serde_json maps are ordered, so serialization is canonical
    let bytes = value.to_string();
    let digest = hex::encode(Sha256::digest(bytes.as_bytes()));
    digest[..16].to_string()
}

fn apply_selector(mut spec: ModelSpec, selector: &ModelSelector) -> ModelSpec {
    if let Some(provider) = &selector.provider {
        if *provider != spec.provider {
            // Endpoint and credentials belong to the provider being replaced
            spec.base_url = None;
            spec.credential_env = None;
        }
        spec.provider = provider.clone();
    }
    if let Some(model) = &selector.model {
        spec.model = model.clone();
    }
    if let Some(var) = &selector.credential_env {
        spec.credential_env = Some(var.clone());
    }
    if let Some(url) = &selector.base_url {
        spec.base_url = Some(url.clone());
    }
    if let Some(temperature) = selector.temperature {
        spec = spec.with_temperature(temperature);
    }
    if let Some(max_tokens) = selector.max_tokens {
        spec = spec.with_max_tokens(max_tokens);
    }
    spec
}

fn apply_limits(mut settings: ExecutorSettings, limits: &ExecutorLimits) -> ExecutorSettings {
    if let Some(hops) = limits.max_agent_hops {
        settings.max_agent_hops = hops;
    }
    if let Some(limit) = limits.consecutive_agent_route_limit {
        settings.consecutive_route_limit = limit;
    }
    if let Some(limit) = limits.step_limit {
        settings.step_limit = limit;
    }
    // Resolve the derived step limit so it is part of the hash
    settings.step_limit = settings.effective_step_limit();

    let timeouts: &mut RoleTimeouts = &mut settings.timeouts;
    if let Some(ms) = limits.coordinator_timeout_ms {
        timeouts.coordinator_ms = ms;
    }
    if let Some(ms) = limits.plugin_agent_timeout_ms {
        timeouts.plugin_agent_ms = ms;
    }
    if let Some(ms) = limits.tool_timeout_ms {
        timeouts.tool_ms = ms;
    }
    if let Some(ms) = limits.suspend_timeout_ms {
        timeouts.suspend_ms = ms;
    }
    if let Some(ms) = limits.finalizer_timeout_ms {
        timeouts.finalizer_ms = ms;
    }
    if let Some(enabled) = limits.error_handler {
        settings.error_handler = enabled;
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceConfig, NodeOverride};

    fn instance(plugins: &[&str]) -> OrchestratorInstance {
        let mut instance = OrchestratorInstance::new("t1", "bot").with_id("i1");
        for plugin in plugins {
            instance = instance.with_plugin(plugin.parse().unwrap());
        }
        instance
    }

    #[test]
    fn test_hash_is_order_independent() {
        let defaults = ConfigDefaults::default();
        let a = config_hash(&instance(&["math", "weather@2.0", "notes"]), &defaults).unwrap();
        let b = config_hash(&instance(&["notes", "math", "weather@2.0", "math"]), &defaults).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_explicit_default_hashes_like_unset() {
        let defaults = ConfigDefaults::default();
        let implicit = instance(&["math"]);
        let explicit = instance(&["math"]).with_config(InstanceConfig::default().with_limits(ExecutorLimits {
            max_agent_hops: Some(defaults.executor.max_agent_hops),
            ..Default::default()
        }));

        assert_eq!(
            config_hash(&implicit, &defaults).unwrap(),
            config_hash(&explicit, &defaults).unwrap()
        );
    }

    #[test]
    fn test_changes_alter_hash() {
        let defaults = ConfigDefaults::default();
        let base = config_hash(&instance(&["math"]), &defaults).unwrap();

        let more_plugins = config_hash(&instance(&["math", "weather"]), &defaults).unwrap();
        assert_ne!(base, more_plugins);

        let hotter = instance(&["math"]).with_config(
            InstanceConfig::default().with_node(
                "math",
                NodeOverride {
                    model: Some(ModelSelector::default().with_temperature(1.5)),
                    prompt_override: None,
                },
            ),
        );
        assert_ne!(base, config_hash(&hotter, &defaults).unwrap());

        // Settings for a plugin that is not active do not matter
        let unused = instance(&["math"])
            .with_config(InstanceConfig::default().with_plugin_settings("weather", serde_json::json!({"units": "metric"})));
        assert_eq!(base, config_hash(&unused, &defaults).unwrap());
    }

    #[test]
    fn test_node_overrides_resolve_per_role() {
        let defaults = ConfigDefaults::default();
        let instance = instance(&["math"]).with_config(
            InstanceConfig::default()
                .with_default_model(ModelSelector::model("gpt-4o"))
                .with_node(
                    COORDINATOR,
                    NodeOverride {
                        model: Some(ModelSelector::model("llama3").with_provider("ollama")),
                        prompt_override: Some("Route carefully.".into()),
                    },
                ),
        );

        let effective = EffectiveConfig::resolve(&instance, &defaults);
        let coordinator = effective.model_for(COORDINATOR).unwrap();
        assert_eq!(coordinator.provider, "ollama");
        assert_eq!(coordinator.model, "llama3");
        assert!(coordinator.credential_env.is_none());

        let finalizer = effective.model_for(FINALIZER).unwrap();
        assert_eq!(finalizer.model, "gpt-4o");
        assert_eq!(finalizer.credential_env.as_deref(), Some("OPENAI_API_KEY"));

        assert_eq!(effective.model_for("math").unwrap().model, "gpt-4o");
        assert_eq!(
            effective.prompt_overrides().coordinator.as_deref(),
            Some("Route carefully.")
        );
    }

    #[test]
    fn test_digest_json_is_key_order_independent() {
        let a: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": [1, 2]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b": [1, 2], "a": 1}"#).unwrap();
        assert_eq!(digest_json(&a), digest_json(&b));
    }
}
