//! Orchestrator instances as stored and configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use switchboard_agent::PluginRef;

/// Residency tier of an instance in a process's pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Known, nothing cached
    #[default]
    Cold,
    /// Configuration cached
    Warm,
    /// Executor built and ready
    Hot,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Cold => write!(f, "cold"),
            Tier::Warm => write!(f, "warm"),
            Tier::Hot => write!(f, "hot"),
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cold" => Ok(Tier::Cold),
            "warm" => Ok(Tier::Warm),
            "hot" => Ok(Tier::Hot),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Partial model selection; unset fields fall through to process defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelSelector {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Per-node override. Keys in [`InstanceConfig::nodes`] are `coordinator`,
/// `suspend`, `finalizer` or a plugin id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_override: Option<String>,
}

/// Executor limits; unset values use process defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_agent_hops: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_agent_route_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_agent_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalizer_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<bool>,
}

/// Structured instance configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Model used by every node without an override
    #[serde(default)]
    pub default_model: ModelSelector,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeOverride>,
    /// Settings passed to each plugin, keyed by plugin id
    #[serde(default)]
    pub plugin_settings: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub limits: ExecutorLimits,
}

impl InstanceConfig {
    pub fn with_default_model(mut self, model: ModelSelector) -> Self {
        self.default_model = model;
        self
    }

    pub fn with_node(mut self, node: impl Into<String>, config: NodeOverride) -> Self {
        self.nodes.insert(node.into(), config);
        self
    }

    pub fn with_plugin_settings(mut self, pid: impl Into<String>, settings: serde_json::Value) -> Self {
        self.plugin_settings.insert(pid.into(), settings);
        self
    }

    pub fn with_limits(mut self, limits: ExecutorLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// A configured orchestrator for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorInstance {
    pub instance_id: String,
    pub tenant_id: String,
    pub name: String,
    /// Immutable after creation
    pub framework: String,
    /// Immutable after creation
    pub mode: String,
    pub plugins: Vec<PluginRef>,
    pub config: InstanceConfig,
    /// Hash of the effective configuration; set by the change detector
    #[serde(default)]
    pub config_hash: String,
    /// Tier requested at creation or by the last load command
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestratorInstance {
    /// A new instance with a generated id.
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            instance_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            framework: "graph".to_string(),
            mode: "coordinator".to_string(),
            plugins: Vec::new(),
            config: InstanceConfig::default(),
            config_hash: String::new(),
            tier: Tier::Cold,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_selectors(mut self, framework: impl Into<String>, mode: impl Into<String>) -> Self {
        self.framework = framework.into();
        self.mode = mode.into();
        self
    }

    pub fn with_plugin(mut self, plugin: PluginRef) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_config(mut self, config: InstanceConfig) -> Self {
        self.config = config;
        self
    }

    /// Settings for plugin `pid`, `null` when none are configured.
    pub fn plugin_settings(&self, pid: &str) -> serde_json::Value {
        self.config
            .plugin_settings
            .get(pid)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_and_order() {
        assert_eq!("HOT".parse::<Tier>().unwrap(), Tier::Hot);
        assert!("lukewarm".parse::<Tier>().is_err());
        assert!(Tier::Cold < Tier::Warm && Tier::Warm < Tier::Hot);
    }

    #[test]
    fn test_instance_serializes_plugin_refs_as_strings() {
        let instance = OrchestratorInstance::new("t1", "Support bot")
            .with_id("i1")
            .with_plugin("math".parse().unwrap());

        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["plugins"][0], "math@latest");
        assert_eq!(json["tier"], "cold");

        let back: OrchestratorInstance = serde_json::from_value(json).unwrap();
        assert_eq!(back, instance);
    }
}
