//! Switchboard Agent - Multi-agent conversation graphs
//!
//! Provides the per-turn machinery behind a switchboard instance:
//! - Trait-based model clients (OpenAI-compatible, scripted mock)
//! - A plugin contract and process-wide plugin registry
//! - A coordinator graph with hop, consecutive-route and step guards
//! - Streaming turn events
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────┐
//!   user ──▶ │ coordinator  │ ◀──────────────────────┐
//!            └──────┬───────┘                        │
//!                   ▼                                │
//!            ┌──────────────┐   route_to_<p>  ┌──────┴───────┐
//!            │control_tools │ ──────────────▶ │ <p>_agent    │
//!            └──┬────────┬──┘                 │  └▶ <p>_tools│
//!      guard    │        │ finalize           └──────────────┘
//!      tripped  ▼        ▼
//!        ┌─────────┐  ┌───────────┐
//!        │ suspend │─▶│ finalizer │ ──▶ response
//!        └─────────┘  └───────────┘
//! ```

pub mod backend;
pub mod graph;
pub mod plugin;
pub mod stream;

// Re-export main types for convenience
pub use backend::traits::{CompletionRequest, CompletionResponse, Message, ModelClient, ModelError};
pub use backend::{ModelClientFactory, ModelSpec};
pub use graph::{
    ConversationState, ExecutorSettings, GraphError, GraphExecutor, GraphTemplate, NodeModels,
    ResponseTone, SuspendReason, TurnOutcome, TurnStatus,
};
pub use plugin::{PluginBundle, PluginError, PluginFactory, PluginRef, PluginRegistry};
pub use stream::{EventSink, TurnEvent, TurnEventStream};
