//! Scripted model client for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this response
    Respond(CompletionResponse),
    /// Fail with this error
    Fail(ModelError),
}

/// Mock model client for testing.
///
/// Replies are taken from a script in order; once the script is exhausted
/// every call returns the default reply. Every request is recorded.
pub struct MockModel {
    model_id: String,
    available: AtomicBool,
    script: Mutex<VecDeque<MockReply>>,
    default_reply: MockReply,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicU32,
}

impl MockModel {
    /// Create a new mock model.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            default_reply: MockReply::Respond(CompletionResponse::text("Mock response")),
            delay: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Set the default text response.
    pub fn with_response(mut self, content: impl Into<String>) -> Self {
        self.default_reply = MockReply::Respond(CompletionResponse::text(content));
        self
    }

    /// Set the default reply to a single tool call.
    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        self.default_reply = MockReply::Respond(CompletionResponse::tool_call(name, arguments));
        self
    }

    /// Set the default reply to an error.
    pub fn with_error(mut self, error: ModelError) -> Self {
        self.default_reply = MockReply::Fail(error);
        self
    }

    /// Queue scripted replies, consumed before the default.
    pub fn with_script(mut self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.script.get_mut().extend(replies);
        self
    }

    /// Queue one scripted text reply.
    pub fn then_text(self, content: impl Into<String>) -> Self {
        self.with_script([MockReply::Respond(CompletionResponse::text(content))])
    }

    /// Queue one scripted tool call reply.
    pub fn then_tool_call(self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        self.with_script([MockReply::Respond(CompletionResponse::tool_call(
            name, arguments,
        ))])
    }

    /// Delay every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Get the number of times invoke was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

#[async_trait]
impl ModelClient for MockModel {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn invoke(&self, request: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(ModelError::Unavailable("Mock model disabled".to_string()));
        }

        let prompt_tokens: u32 = request
            .messages
            .iter()
            .map(|m| m.content.len() as u32 / 4)
            .sum();
        self.requests.lock().await.push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        match reply {
            MockReply::Respond(mut response) => {
                response.usage = Usage {
                    prompt_tokens,
                    completion_tokens: response.content.len() as u32 / 4,
                };
                Ok(response)
            }
            MockReply::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_mock_model() {
        let model = MockModel::new("test-model").with_response("Hello, world!");

        assert!(model.is_available().await);
        assert_eq!(model.call_count(), 0);

        let response = assert_ok!(model.invoke(CompletionRequest::user("Hi")).await);

        assert_eq!(response.content, "Hello, world!");
        assert_eq!(model.call_count(), 1);
        assert_eq!(model.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_script_then_default() {
        let model = MockModel::new("scripted")
            .then_tool_call("route_to_math", serde_json::json!({}))
            .with_response("done");

        let first = model.invoke(CompletionRequest::user("a")).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "route_to_math");
        assert_eq!(first.finish_reason, FinishReason::ToolCalls);

        let second = model.invoke(CompletionRequest::user("b")).await.unwrap();
        assert!(second.tool_calls.is_empty());
        assert_eq!(second.content, "done");
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let model = MockModel::new("test-model").with_available(false);

        assert!(!model.is_available().await);

        let err = assert_err!(model.invoke(CompletionRequest::user("Hi")).await);
        assert!(matches!(err, ModelError::Unavailable(_)));
    }
}
