//! The plugin contract.
//!
//! A plugin is registered once per process as a [`PluginFactory`]. Binding a
//! model to a factory yields a [`PluginAgent`], the object the graph executor
//! actually drives. The pair of agent plus resolved metadata is a
//! [`PluginBundle`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backend::{Message, ModelClient, ModelError, ToolCall, ToolDefinition};

/// Version used when a reference names no version.
pub const LATEST_VERSION: &str = "latest";

/// Errors raised by plugins.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// Plugin id is not registered
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// Settings rejected by the plugin
    #[error("Invalid settings for plugin {pid}: {reason}")]
    InvalidSettings { pid: String, reason: String },

    /// Agent construction failed
    #[error("Failed to create agent for plugin {pid}: {reason}")]
    CreateFailed { pid: String, reason: String },

    /// Tool is not offered by the plugin
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool ran and failed
    #[error("Tool {tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    /// Bound model failed
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// Reference to a plugin as it appears in instance configuration: `pid@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginRef {
    pub pid: String,
    pub version: String,
}

impl PluginRef {
    pub fn new(pid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            version: version.into(),
        }
    }

    /// Reference to the latest version of `pid`.
    pub fn latest(pid: impl Into<String>) -> Self {
        Self::new(pid, LATEST_VERSION)
    }
}

impl fmt::Display for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.pid, self.version)
    }
}

impl FromStr for PluginRef {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (pid, version) = match s.split_once('@') {
            Some((pid, version)) => (pid.trim(), version.trim()),
            None => (s, LATEST_VERSION),
        };

        if pid.is_empty() {
            return Err(PluginError::NotFound(format!("empty plugin id in '{}'", s)));
        }
        let version = if version.is_empty() { LATEST_VERSION } else { version };

        Ok(Self::new(pid, version))
    }
}

impl TryFrom<String> for PluginRef {
    type Error = PluginError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PluginRef> for String {
    fn from(value: PluginRef) -> Self {
        value.to_string()
    }
}

/// Static description of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin id
    pub pid: String,
    /// Version of this implementation
    pub version: String,
    /// Route name used by the coordinator (`route_to_<name>`)
    pub name: String,
    /// What the plugin is good at; shown to the coordinator
    pub description: String,
    /// Whether one agent can safely serve many instances
    pub stateless: bool,
    /// Guidance for the final response when this plugin contributed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_suggestion: Option<String>,
}

impl PluginMetadata {
    pub fn new(pid: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            version: "1.0.0".to_string(),
            name: name.into(),
            description: description.into(),
            stateless: true,
            response_suggestion: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn stateful(mut self) -> Self {
        self.stateless = false;
        self
    }

    pub fn with_response_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.response_suggestion = Some(suggestion.into());
        self
    }

    /// Whether this implementation satisfies `plugin_ref`.
    pub fn satisfies(&self, plugin_ref: &PluginRef) -> bool {
        self.pid == plugin_ref.pid
            && (plugin_ref.version == LATEST_VERSION || plugin_ref.version == self.version)
    }
}

/// Result of a plugin health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PluginHealth {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl PluginHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, PluginHealth::Healthy)
    }
}

/// Outcome of one plugin-agent model call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentDecision {
    /// Run these tools, then return to the coordinator
    Continue {
        message: Message,
        tool_calls: Vec<ToolCall>,
    },
    /// Hand control back to the coordinator
    Return { message: Message },
}

/// A plugin registered with the process.
#[async_trait]
pub trait PluginFactory: Send + Sync {
    /// Static plugin description.
    fn metadata(&self) -> &PluginMetadata;

    /// Check per-instance settings before building.
    fn validate(&self, _settings: &serde_json::Value) -> Result<(), PluginError> {
        Ok(())
    }

    /// Check external dependencies of the plugin.
    async fn health_check(&self) -> PluginHealth {
        PluginHealth::Healthy
    }

    /// Tools the plugin's agent offers.
    fn tools(&self) -> Vec<ToolDefinition>;

    /// Create an agent bound to `model`.
    fn create_agent(
        &self,
        model: Arc<dyn ModelClient>,
        settings: &serde_json::Value,
    ) -> Result<Arc<dyn PluginAgent>, PluginError>;
}

/// A plugin agent bound to a model.
#[async_trait]
pub trait PluginAgent: Send + Sync {
    /// System prompt for the agent's own model call.
    fn system_prompt(&self) -> String;

    /// Tools the agent may call.
    fn tools(&self) -> Vec<ToolDefinition>;

    /// Run the agent's model over the conversation.
    async fn decide(&self, messages: &[Message]) -> Result<AgentDecision, PluginError>;

    /// Execute one tool call and return its textual result.
    async fn invoke_tool(&self, call: &ToolCall) -> Result<String, PluginError>;
}

/// A plugin agent ready for an executor, with its resolved metadata.
pub struct PluginBundle {
    pub plugin_ref: PluginRef,
    pub metadata: PluginMetadata,
    pub agent: Arc<dyn PluginAgent>,
}

impl PluginBundle {
    pub fn new(plugin_ref: PluginRef, metadata: PluginMetadata, agent: Arc<dyn PluginAgent>) -> Self {
        Self {
            plugin_ref,
            metadata,
            agent,
        }
    }

    /// Route name used by the coordinator.
    pub fn route_name(&self) -> &str {
        &self.metadata.name
    }
}

impl fmt::Debug for PluginBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBundle")
            .field("plugin_ref", &self.plugin_ref)
            .field("stateless", &self.metadata.stateless)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_ref_parsing() {
        let r: PluginRef = "math@1.2.0".parse().unwrap();
        assert_eq!(r, PluginRef::new("math", "1.2.0"));

        let r: PluginRef = "weather".parse().unwrap();
        assert_eq!(r.version, LATEST_VERSION);
        assert_eq!(r.to_string(), "weather@latest");

        let r: PluginRef = "notes@".parse().unwrap();
        assert_eq!(r.version, LATEST_VERSION);

        assert!("@1.0".parse::<PluginRef>().is_err());
    }

    #[test]
    fn test_plugin_ref_serde_as_string() {
        let json = serde_json::to_string(&PluginRef::new("math", "2")).unwrap();
        assert_eq!(json, "\"math@2\"");

        let back: PluginRef = serde_json::from_str("\"math\"").unwrap();
        assert_eq!(back, PluginRef::latest("math"));
    }

    #[test]
    fn test_metadata_satisfies() {
        let meta = PluginMetadata::new("math", "math", "Arithmetic").with_version("1.1.0");
        assert!(meta.satisfies(&PluginRef::latest("math")));
        assert!(meta.satisfies(&PluginRef::new("math", "1.1.0")));
        assert!(!meta.satisfies(&PluginRef::new("math", "0.9.0")));
        assert!(!meta.satisfies(&PluginRef::latest("weather")));
    }
}
