//! Per-turn conversation state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::{Message, Usage};

/// Tone the user asked the final response to take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTone {
    #[default]
    Natural,
    Explanatory,
    Formal,
    Concise,
    Learning,
}

impl ResponseTone {
    /// Instruction given to terminal nodes.
    pub fn instruction(&self) -> &'static str {
        match self {
            ResponseTone::Natural => {
                "Answer conversationally, the way a knowledgeable colleague would."
            }
            ResponseTone::Explanatory => {
                "Walk through the reasoning step by step so the user understands how the answer was reached."
            }
            ResponseTone::Formal => "Use precise, professional language without casual phrasing.",
            ResponseTone::Concise => "Give the shortest complete answer. Skip preamble.",
            ResponseTone::Learning => {
                "Teach: explain the underlying idea and suggest how the user could work it out themselves."
            }
        }
    }
}

/// Why a turn was suspended instead of finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuspendReason {
    /// `agent_hops` reached `max_agent_hops`
    HopLimit { hops: u32, max: u32 },
    /// The same plugin was routed to too many times in a row
    ConsecutiveRouteLimit { plugin: String, count: u32, limit: u32 },
    /// Total node executions reached the step limit
    StepLimit { steps: u32, limit: u32 },
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendReason::HopLimit { hops, max } => {
                write!(f, "agent hop limit reached ({}/{})", hops, max)
            }
            SuspendReason::ConsecutiveRouteLimit { plugin, count, limit } => write!(
                f,
                "plugin '{}' routed {} times in a row (limit {})",
                plugin, count, limit
            ),
            SuspendReason::StepLimit { steps, limit } => {
                write!(f, "step limit reached ({}/{})", steps, limit)
            }
        }
    }
}

/// Lifecycle of a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    #[default]
    Running,
    Finalized,
    Suspended { reason: SuspendReason },
    Failed { error: String },
}

impl TurnStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Running)
    }
}

/// Routing bookkeeping for the current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginContext {
    pub last_routed_plugin: Option<String>,
    pub consecutive_routes: u32,
    pub routing_history: Vec<String>,
}

impl PluginContext {
    /// Record a routing decision to `plugin`.
    pub fn record_route(&mut self, plugin: &str) {
        if self.last_routed_plugin.as_deref() == Some(plugin) {
            self.consecutive_routes += 1;
        } else {
            self.last_routed_plugin = Some(plugin.to_string());
            self.consecutive_routes = 1;
        }
        self.routing_history.push(plugin.to_string());
    }

    /// Clear the consecutive-route tracking (history is kept).
    pub fn reset(&mut self) {
        self.last_routed_plugin = None;
        self.consecutive_routes = 0;
    }

    /// Distinct plugins routed to during the turn, in first-use order.
    pub fn plugins_used(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for name in &self.routing_history {
            if !seen.contains(&name.as_str()) {
                seen.push(name.as_str());
            }
        }
        seen
    }
}

/// State threaded through every node during one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub agent_hops: u32,
    pub plugin_context: PluginContext,
    pub tone: ResponseTone,
    pub status: TurnStatus,
    /// Node executions so far
    pub steps: u32,
    /// Tokens spent by coordinator and terminal nodes
    pub usage: Usage,
}

impl ConversationState {
    /// Start a turn over prior history plus a new user message.
    pub fn new_turn(
        conversation_id: impl Into<String>,
        history: Vec<Message>,
        user_message: impl Into<String>,
        tone: ResponseTone,
    ) -> Self {
        let mut messages = history;
        messages.push(Message::user(user_message));
        Self {
            conversation_id: conversation_id.into(),
            messages,
            tone,
            ..Default::default()
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Text of the last message, if any.
    pub fn last_content(&self) -> Option<&str> {
        self.messages.last().map(|m| m.content.as_str())
    }
}
