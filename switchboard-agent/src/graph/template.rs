//! Compiled graph templates.
//!
//! A template is the model-independent shape of an executor: which plugin
//! routes exist and which routing tools the coordinator is offered. It
//! depends only on framework, mode and the plugin set, so instances with the
//! same plugins share one template. Transitions between nodes are fixed by
//! the executor: plugin tools always return to the coordinator.

use std::collections::BTreeMap;

use super::GraphError;
use crate::backend::ToolDefinition;
use crate::plugin::{PluginMetadata, PluginRef};

/// Framework/mode pairs this executor can compile.
pub const SUPPORTED_SELECTORS: &[(&str, &str)] = &[("graph", "coordinator")];

/// Coordinator tool that ends the turn.
pub const FINALIZE_TOOL: &str = "finalize";

/// Prefix of coordinator tools that route to a plugin.
pub const ROUTE_PREFIX: &str = "route_to_";

pub const COORDINATOR: &str = "coordinator";
pub const SUSPEND: &str = "suspend";
pub const FINALIZER: &str = "finalizer";
pub const ERROR_HANDLER: &str = "error_handler";

/// One plugin route offered to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSpec {
    pub route_name: String,
    pub plugin_ref: PluginRef,
    pub description: String,
    pub response_suggestion: Option<String>,
}

impl RouteSpec {
    pub fn tool_name(&self) -> String {
        format!("{}{}", ROUTE_PREFIX, self.route_name)
    }

    pub fn agent_node(&self) -> String {
        format!("{}_agent", self.route_name)
    }

    pub fn tools_node(&self) -> String {
        format!("{}_tools", self.route_name)
    }
}

/// Model-independent executor shape.
#[derive(Debug, Clone)]
pub struct GraphTemplate {
    framework: String,
    mode: String,
    routes: BTreeMap<String, RouteSpec>,
    coordinator_tools: Vec<ToolDefinition>,
}

/// Normalize a plugin name into a route name.
pub fn route_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl GraphTemplate {
    /// Content key shared by every instance with the same shape.
    pub fn cache_key(framework: &str, mode: &str, plugins: &[PluginRef]) -> String {
        let mut refs: Vec<String> = plugins.iter().map(|r| r.to_string()).collect();
        refs.sort();
        refs.dedup();
        format!("{}/{}/[{}]", framework, mode, refs.join(","))
    }

    /// Compile a template for the given plugins.
    pub fn compile(
        framework: &str,
        mode: &str,
        plugins: &[(PluginRef, PluginMetadata)],
    ) -> Result<Self, GraphError> {
        if !SUPPORTED_SELECTORS
            .iter()
            .any(|(f, m)| *f == framework && *m == mode)
        {
            return Err(GraphError::Unsupported {
                framework: framework.to_string(),
                mode: mode.to_string(),
            });
        }

        let mut routes = BTreeMap::new();
        for (plugin_ref, metadata) in plugins {
            let name = route_name(&metadata.name);
            if name.is_empty() {
                return Err(GraphError::InvalidGraph(format!(
                    "plugin {} has an empty route name",
                    plugin_ref
                )));
            }
            let spec = RouteSpec {
                route_name: name.clone(),
                plugin_ref: plugin_ref.clone(),
                description: metadata.description.clone(),
                response_suggestion: metadata.response_suggestion.clone(),
            };
            if let Some(existing) = routes.insert(name.clone(), spec) {
                return Err(GraphError::InvalidGraph(format!(
                    "route '{}' is claimed by both {} and {}",
                    name, existing.plugin_ref, plugin_ref
                )));
            }
        }

        let mut coordinator_tools = Vec::new();

        for spec in routes.values() {
            coordinator_tools.push(ToolDefinition::new(
                spec.tool_name(),
                format!("Hand the conversation to the {} agent: {}", spec.route_name, spec.description),
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "reason": {"type": "string", "description": "Why this agent should act next"}
                    }
                }),
            ));
        }

        coordinator_tools.push(ToolDefinition::new(
            FINALIZE_TOOL,
            "Finish the turn and write the final answer for the user",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "Why the turn is complete"}
                }
            }),
        ));

        Ok(Self {
            framework: framework.to_string(),
            mode: mode.to_string(),
            routes,
            coordinator_tools,
        })
    }

    pub fn framework(&self) -> &str {
        &self.framework
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Key this template is cached under.
    pub fn key(&self) -> String {
        let refs: Vec<PluginRef> = self.routes.values().map(|r| r.plugin_ref.clone()).collect();
        Self::cache_key(&self.framework, &self.mode, &refs)
    }

    pub fn route(&self, name: &str) -> Option<&RouteSpec> {
        self.routes.get(name)
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteSpec> {
        self.routes.values()
    }

    /// Routing tools offered to the coordinator (plugin routes plus finalize).
    pub fn coordinator_tools(&self) -> &[ToolDefinition] {
        &self.coordinator_tools
    }
}
