//! Turn event streaming.
//!
//! The executor reports progress through an [`EventSink`]; callers that want
//! live updates hold the matching [`TurnEventStream`].

use futures::Stream;
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Progress event emitted while a turn runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    AgentStart { node: String },
    ToolStart { node: String, tool: String },
    ToolEnd { node: String, tool: String, ok: bool },
    Message { node: String, content: String },
    AgentEnd { node: String },
    Error { node: String, message: String },
}

impl TurnEvent {
    pub fn node(&self) -> &str {
        match self {
            TurnEvent::AgentStart { node }
            | TurnEvent::ToolStart { node, .. }
            | TurnEvent::ToolEnd { node, .. }
            | TurnEvent::Message { node, .. }
            | TurnEvent::AgentEnd { node }
            | TurnEvent::Error { node, .. } => node,
        }
    }
}

/// Where the executor sends events; a disabled sink drops them.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::Sender<TurnEvent>>,
}

impl EventSink {
    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Send an event; a closed receiver is ignored so the turn still completes.
    pub async fn emit(&self, event: TurnEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event).await;
        }
    }

    pub async fn agent_start(&self, node: &str) {
        self.emit(TurnEvent::AgentStart { node: node.to_string() }).await;
    }

    pub async fn agent_end(&self, node: &str) {
        self.emit(TurnEvent::AgentEnd { node: node.to_string() }).await;
    }

    pub async fn error(&self, node: &str, message: impl Into<String>) {
        self.emit(TurnEvent::Error {
            node: node.to_string(),
            message: message.into(),
        })
        .await;
    }
}

pin_project! {
    /// Ordered stream of events for one turn.
    pub struct TurnEventStream {
        #[pin]
        receiver: mpsc::Receiver<TurnEvent>,
        // Content of the last message event
        final_message: Option<String>,
        // Whether the sender side has finished
        complete: bool,
    }
}

impl TurnEventStream {
    /// Create a sink/stream pair.
    pub fn channel(buffer: usize) -> (EventSink, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        let sink = EventSink { sender: Some(tx) };
        let stream = Self {
            receiver: rx,
            final_message: None,
            complete: false,
        };
        (sink, stream)
    }

    /// Last message content seen so far.
    pub fn final_message(&self) -> Option<&str> {
        self.final_message.as_deref()
    }

    /// Whether the producing turn has finished.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Drain the stream into a vector.
    pub async fn collect_events(mut self) -> Vec<TurnEvent> {
        use futures::StreamExt;

        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for TurnEventStream {
    type Item = TurnEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if let TurnEvent::Message { content, .. } = &event {
                    *this.final_message = Some(content.clone());
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                *this.complete = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut stream) = TurnEventStream::channel(8);

        tokio::spawn(async move {
            sink.agent_start("finalizer").await;
            sink.emit(TurnEvent::Message {
                node: "finalizer".into(),
                content: "4".into(),
            })
            .await;
            sink.agent_end("finalizer").await;
        });

        let mut nodes = Vec::new();
        while let Some(event) = stream.next().await {
            nodes.push(event);
        }

        assert_eq!(nodes.len(), 3);
        assert!(matches!(nodes[0], TurnEvent::AgentStart { .. }));
        assert!(matches!(nodes[2], TurnEvent::AgentEnd { .. }));
        assert_eq!(stream.final_message(), Some("4"));
        assert!(stream.is_complete());
    }

    #[tokio::test]
    async fn test_disabled_sink_is_silent() {
        EventSink::disabled().agent_start("coordinator").await;
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(TurnEvent::ToolEnd {
            node: "math_tools".into(),
            tool: "add".into(),
            ok: true,
        })
        .unwrap();
        assert_eq!(json["type"], "tool_end");
        assert_eq!(json["tool"], "add");
    }
}
