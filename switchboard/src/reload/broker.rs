//! Reload brokers.
//!
//! Every subscriber receives every event (fan-out, not work queues): each
//! process keeps its own pool consistent.

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use super::events::{ReloadEvent, RELOAD_WILDCARD};
use crate::config::NatsArgs;
use crate::types::{Result, SwitchboardError};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Capacity of the in-memory channel
const DEFAULT_CAPACITY: usize = 1024;

/// Events delivered to one subscriber.
pub type ReloadStream = Pin<Box<dyn Stream<Item = ReloadEvent> + Send>>;

/// Broadcast channel for reload events.
#[async_trait]
pub trait ReloadBroker: Send + Sync {
    async fn publish(&self, event: &ReloadEvent) -> Result<()>;

    /// A stream of every event published after the call.
    async fn subscribe(&self) -> Result<ReloadStream>;
}

/// Single-process broker over a tokio broadcast channel.
#[derive(Clone)]
pub struct InMemoryBroker {
    sender: broadcast::Sender<ReloadEvent>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl ReloadBroker for InMemoryBroker {
    async fn publish(&self, event: &ReloadEvent) -> Result<()> {
        if self.sender.send(event.clone()).is_err() {
            debug!(instance_id = %event.instance_id, "Reload event published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<ReloadStream> {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Reload subscriber lagged, events dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Broker over core NATS subjects.
#[derive(Clone)]
pub struct NatsReloadBroker {
    client: Client,
}

impl NatsReloadBroker {
    /// Connect to NATS; fails fast when the server is unreachable.
    pub async fn connect(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| SwitchboardError::Broker(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReloadBroker for NatsReloadBroker {
    async fn publish(&self, event: &ReloadEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| SwitchboardError::Broker(format!("Failed to encode event: {}", e)))?;

        self.client
            .publish(event.subject(), Bytes::from(payload))
            .await
            .map_err(|e| SwitchboardError::Broker(format!("Publish failed: {}", e)))
    }

    async fn subscribe(&self) -> Result<ReloadStream> {
        // No queue group: every process sees every event
        let subscriber = self
            .client
            .subscribe(RELOAD_WILDCARD)
            .await
            .map_err(|e| SwitchboardError::Broker(format!("Subscribe failed: {}", e)))?;

        let stream = subscriber.filter_map(|message| async move {
            match serde_json::from_slice::<ReloadEvent>(&message.payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(subject = %message.subject, error = %e, "Discarding malformed reload event");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
