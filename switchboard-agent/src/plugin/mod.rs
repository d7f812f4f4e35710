//! Pluggable agents.
//!
//! - `contract`: the traits and types every plugin implements
//! - `agent`: the stock model-backed agent and tool-based factory
//! - `registry`: process-wide plugin registry

pub mod agent;
pub mod contract;
pub mod registry;

pub use agent::{ModelBackedAgent, ToolHandler, ToolPlugin};
pub use contract::{
    AgentDecision, PluginAgent, PluginBundle, PluginError, PluginFactory, PluginHealth,
    PluginMetadata, PluginRef, LATEST_VERSION,
};
pub use registry::PluginRegistry;
