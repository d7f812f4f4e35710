//! Model-backed plugin agents.
//!
//! `ModelBackedAgent` is the stock [`PluginAgent`]: its bound model decides
//! whether to call tools, and tool calls are dispatched to registered
//! handlers. `ToolPlugin` is a [`PluginFactory`] assembled from a prompt and
//! a set of tool handlers, enough for most plugins.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::contract::{AgentDecision, PluginAgent, PluginError, PluginFactory, PluginMetadata};
use crate::backend::{CompletionRequest, Message, ModelClient, ToolCall, ToolDefinition};

/// Handler invoked for one tool call; receives the parsed arguments.
pub type ToolHandler = Arc<dyn Fn(&serde_json::Value) -> Result<String, String> + Send + Sync>;

/// Plugin agent whose decisions come from a bound model.
pub struct ModelBackedAgent {
    name: String,
    system_prompt: String,
    model: Arc<dyn ModelClient>,
    tools: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl ModelBackedAgent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model,
            tools: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_tool(mut self, definition: ToolDefinition, handler: ToolHandler) -> Self {
        self.handlers.insert(definition.name.clone(), handler);
        self.tools.push(definition);
        self
    }
}

#[async_trait]
impl PluginAgent for ModelBackedAgent {
    fn system_prompt(&self) -> String {
        self.system_prompt.clone()
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        self.tools.clone()
    }

    async fn decide(&self, messages: &[Message]) -> Result<AgentDecision, PluginError> {
        let request = CompletionRequest::from_messages(messages.to_vec())
            .with_system(self.system_prompt.clone())
            .with_tools(self.tools.clone());

        let response = self.model.invoke(request).await?;

        if response.tool_calls.is_empty() {
            return Ok(AgentDecision::Return {
                message: Message::assistant(response.content).named(self.name.clone()),
            });
        }

        let tool_calls = response.tool_calls.clone();
        debug!(agent = %self.name, tools = tool_calls.len(), "Agent requested tools");
        Ok(AgentDecision::Continue {
            message: response.into_message().named(self.name.clone()),
            tool_calls,
        })
    }

    async fn invoke_tool(&self, call: &ToolCall) -> Result<String, PluginError> {
        let handler = self
            .handlers
            .get(&call.name)
            .ok_or_else(|| PluginError::UnknownTool(call.name.clone()))?;

        handler(&call.arguments).map_err(|reason| PluginError::ToolFailed {
            tool: call.name.clone(),
            reason,
        })
    }
}

/// Factory built from a prompt and tool handlers.
#[derive(Clone)]
pub struct ToolPlugin {
    metadata: PluginMetadata,
    system_prompt: String,
    tools: Vec<(ToolDefinition, ToolHandler)>,
    required_settings: Vec<String>,
}

impl ToolPlugin {
    pub fn new(metadata: PluginMetadata, system_prompt: impl Into<String>) -> Self {
        Self {
            metadata,
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            required_settings: Vec::new(),
        }
    }

    /// Add a tool and its handler.
    pub fn with_tool<F>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<String, String> + Send + Sync + 'static,
    {
        self.tools.push((definition, Arc::new(handler)));
        self
    }

    /// Require a key in per-instance settings.
    pub fn with_required_setting(mut self, key: impl Into<String>) -> Self {
        self.required_settings.push(key.into());
        self
    }
}

impl fmt::Debug for ToolPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolPlugin")
            .field("pid", &self.metadata.pid)
            .field("tools", &self.tools.len())
            .finish()
    }
}

#[async_trait]
impl PluginFactory for ToolPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn validate(&self, settings: &serde_json::Value) -> Result<(), PluginError> {
        if !(settings.is_null() || settings.is_object()) {
            return Err(PluginError::InvalidSettings {
                pid: self.metadata.pid.clone(),
                reason: "settings must be an object".to_string(),
            });
        }

        for key in &self.required_settings {
            if settings.get(key).is_none() {
                return Err(PluginError::InvalidSettings {
                    pid: self.metadata.pid.clone(),
                    reason: format!("missing required setting '{}'", key),
                });
            }
        }
        Ok(())
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|(def, _)| def.clone()).collect()
    }

    fn create_agent(
        &self,
        model: Arc<dyn ModelClient>,
        settings: &serde_json::Value,
    ) -> Result<Arc<dyn PluginAgent>, PluginError> {
        self.validate(settings)?;

        let mut agent = ModelBackedAgent::new(
            self.metadata.name.clone(),
            self.system_prompt.clone(),
            model,
        );
        for (definition, handler) in &self.tools {
            agent = agent.with_tool(definition.clone(), handler.clone());
        }
        Ok(Arc::new(agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockModel;

    fn calculator() -> ToolPlugin {
        ToolPlugin::new(
            PluginMetadata::new("math", "math", "Arithmetic"),
            "You solve arithmetic.",
        )
        .with_tool(
            ToolDefinition::new(
                "add",
                "Add two numbers",
                serde_json::json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}),
            ),
            |args| {
                let a = args["a"].as_f64().ok_or("missing a")?;
                let b = args["b"].as_f64().ok_or("missing b")?;
                Ok(format!("{}", a + b))
            },
        )
    }

    #[tokio::test]
    async fn test_decide_returns_without_tool_calls() {
        let model = Arc::new(MockModel::new("m").with_response("2 + 2 = 4"));
        let agent = calculator().create_agent(model, &serde_json::Value::Null).unwrap();

        let decision = agent.decide(&[Message::user("What is 2+2?")]).await.unwrap();
        match decision {
            AgentDecision::Return { message } => {
                assert_eq!(message.content, "2 + 2 = 4");
                assert_eq!(message.name.as_deref(), Some("math"));
            }
            other => panic!("expected Return, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decide_continues_with_tool_calls() {
        let model = Arc::new(
            MockModel::new("m").with_tool_call("add", serde_json::json!({"a": 2, "b": 2})),
        );
        let agent = calculator().create_agent(model, &serde_json::Value::Null).unwrap();

        let decision = agent.decide(&[Message::user("add")]).await.unwrap();
        let AgentDecision::Continue { tool_calls, .. } = decision else {
            panic!("expected Continue");
        };

        let result = agent.invoke_tool(&tool_calls[0]).await.unwrap();
        assert_eq!(result, "4");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let model = Arc::new(MockModel::new("m"));
        let agent = calculator().create_agent(model, &serde_json::Value::Null).unwrap();

        let call = ToolCall::new("divide", serde_json::json!({}));
        assert!(matches!(
            agent.invoke_tool(&call).await,
            Err(PluginError::UnknownTool(_))
        ));
    }

    #[test]
    fn test_required_settings() {
        let plugin = calculator().with_required_setting("precision");
        assert!(plugin.validate(&serde_json::json!({})).is_err());
        assert!(plugin.validate(&serde_json::json!({"precision": 2})).is_ok());
        assert!(plugin.validate(&serde_json::json!([1])).is_err());
    }
}
