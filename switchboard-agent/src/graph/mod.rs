//! The conversation graph.
//!
//! - `template`: model-independent executor shape, shared between instances
//! - `routing`: guard checks and routing-call interpretation
//! - `executor`: runs one guarded turn over a template and bound models

pub mod executor;
pub mod prompts;
pub mod routing;
pub mod settings;
pub mod state;
pub mod template;

pub use executor::{GraphExecutor, NodeModels, TurnOutcome};
pub use prompts::PromptAssembler;
pub use routing::RoutingDecision;
pub use settings::{
    ExecutorSettings, FallbackResponses, PromptOverrides, RoleTimeouts,
    DEFAULT_CONSECUTIVE_ROUTE_LIMIT, DEFAULT_MAX_AGENT_HOPS,
};
pub use state::{ConversationState, PluginContext, ResponseTone, SuspendReason, TurnStatus};
pub use template::{route_name, GraphTemplate, RouteSpec};

use crate::backend::ModelError;

/// Errors raised while compiling or running a graph.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    /// Coordinator chose a target that is not a route
    #[error("Routing error: {0}")]
    Routing(String),

    /// A node's model failed in a way the node cannot absorb
    #[error("Provider error in {node}: {source}")]
    Provider { node: String, source: ModelError },

    /// Template or bundle set is inconsistent
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// No executor exists for this framework/mode
    #[error("Unsupported framework/mode: {framework}/{mode}")]
    Unsupported { framework: String, mode: String },
}
