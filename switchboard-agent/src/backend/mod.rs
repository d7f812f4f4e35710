//! Model client abstraction layer.
//!
//! Provides a trait-based interface over language-model providers:
//! - OpenAI-compatible (OpenAI, vLLM, Ollama, etc.)
//! - Scripted mock for testing

pub mod factory;
pub mod mock;
pub mod openai;
pub mod traits;

pub use factory::{ModelClientFactory, ModelSpec, ProviderClientFactory};
pub use mock::{MockModel, MockReply};
pub use openai::OpenAiClient;
pub use traits::{
    CompletionRequest, CompletionResponse, FinishReason, Message, MessageRole, ModelClient,
    ModelError, ToolCall, ToolDefinition, Usage,
};
