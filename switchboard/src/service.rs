//! Service facade consumed by a transport layer.
//!
//! Runs turns against pooled executors and exposes the operations surface.
//! Turns within one conversation are serialized; everything else runs in
//! parallel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use switchboard_agent::backend::Usage;
use switchboard_agent::{ConversationState, Message, ResponseTone, TurnEventStream, TurnOutcome, TurnStatus};

use crate::changes::{ChangeDetector, ConfigChange};
use crate::config::ConversationConfig;
use crate::instance::{OrchestratorInstance, Tier};
use crate::logging::UsageLogger;
use crate::pool::{ExecutorHandle, InstanceHealth, PoolManager, PoolStats};
use crate::types::{Result, SwitchboardError};

/// Events buffered between a streaming turn and its reader
const DEFAULT_STREAM_BUFFER: usize = 64;

/// One user message to an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub message: String,
    #[serde(default)]
    pub tone: ResponseTone,
}

impl TurnRequest {
    pub fn new(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message: message.into(),
            tone: ResponseTone::default(),
        }
    }

    pub fn with_tone(mut self, tone: ResponseTone) -> Self {
        self.tone = tone;
        self
    }
}

/// Result of one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub conversation_id: String,
    pub instance_id: String,
    /// Configuration the turn ran on
    pub config_hash: String,
    pub response: String,
    pub status: TurnStatus,
    pub agent_hops: u32,
    pub duration_ms: u64,
    pub usage: Usage,
}

/// Prior messages of one conversation.
#[derive(Debug)]
struct Conversation {
    messages: Vec<Message>,
    last_used: Instant,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            last_used: Instant::now(),
        }
    }
}

impl Conversation {
    /// The most recent `limit` messages.
    fn window(&self, limit: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..].to_vec()
    }

    /// Append one exchange, keeping at most `limit` messages.
    fn record(&mut self, user: Message, assistant: Message, limit: usize) {
        self.messages.push(user);
        self.messages.push(assistant);
        let excess = self.messages.len().saturating_sub(limit);
        self.messages.drain(..excess);
        self.last_used = Instant::now();
    }
}

type History = Arc<Mutex<Conversation>>;

/// Entry point for turns and operator commands.
pub struct SwitchboardService {
    pool: Arc<PoolManager>,
    changes: ChangeDetector,
    usage: UsageLogger,
    /// Prior messages keyed `instance:conversation`
    conversations: DashMap<String, History>,
    conversation_config: ConversationConfig,
    stream_buffer: usize,
}

impl SwitchboardService {
    pub fn new(pool: Arc<PoolManager>, changes: ChangeDetector, usage: UsageLogger) -> Self {
        Self {
            pool,
            changes,
            usage,
            conversations: DashMap::new(),
            conversation_config: ConversationConfig::default(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn with_conversations(mut self, config: ConversationConfig) -> Self {
        self.conversation_config = config;
        self
    }

    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer.max(1);
        self
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    pub fn changes(&self) -> &ChangeDetector {
        &self.changes
    }

    fn history(&self, instance_id: &str, conversation_id: &str) -> History {
        self.conversations
            .entry(format!("{}:{}", instance_id, conversation_id))
            .or_default()
            .value()
            .clone()
    }

    /// Run one turn to completion.
    pub async fn resolve_and_invoke(&self, instance_id: &str, request: TurnRequest) -> Result<TurnReply> {
        let mut history = self
            .history(instance_id, &request.conversation_id)
            .lock_owned()
            .await;
        let handle = self.pool.resolve(instance_id).await?;

        let state = ConversationState::new_turn(
            request.conversation_id.clone(),
            history.window(self.conversation_config.history_limit),
            request.message.clone(),
            request.tone,
        );
        let outcome = handle.invoke(state).await;

        Ok(self.finish_turn(&handle, &mut history, &request.message, outcome).await)
    }

    /// Run one turn on a spawned task, streaming its events.
    ///
    /// The lease and the conversation lock are held by the task until the
    /// turn ends, so dropping the stream does not cancel the turn.
    pub async fn resolve_and_stream(
        self: &Arc<Self>,
        instance_id: &str,
        request: TurnRequest,
    ) -> Result<(TurnEventStream, JoinHandle<Result<TurnReply>>)> {
        let history = self
            .history(instance_id, &request.conversation_id)
            .lock_owned()
            .await;
        let handle = self.pool.resolve(instance_id).await?;

        let state = ConversationState::new_turn(
            request.conversation_id.clone(),
            history.window(self.conversation_config.history_limit),
            request.message.clone(),
            request.tone,
        );
        let (events, turn) = handle.executor().stream_turn(state, self.stream_buffer);

        let service = self.clone();
        let task = tokio::spawn(async move {
            let mut history: OwnedMutexGuard<Conversation> = history;
            let outcome = turn.await.map_err(|e| {
                SwitchboardError::build(handle.instance_id(), format!("turn task aborted: {}", e))
            })?;
            Ok::<_, SwitchboardError>(
                service
                    .finish_turn(&handle, &mut history, &request.message, outcome)
                    .await,
            )
        });

        Ok((events, task))
    }

    async fn finish_turn(
        &self,
        handle: &ExecutorHandle,
        history: &mut Conversation,
        message: &str,
        outcome: TurnOutcome,
    ) -> TurnReply {
        let instance_id = handle.instance_id();
        let state = &outcome.state;

        history.record(
            Message::user(message),
            Message::assistant(outcome.response.clone()),
            self.conversation_config.history_limit,
        );

        match &state.status {
            TurnStatus::Suspended { reason } => {
                let err = SwitchboardError::GuardTripped(reason.to_string());
                info!(instance_id = %instance_id, agent_hops = state.agent_hops, "{}", err);
            }
            TurnStatus::Failed { error } => {
                let err = SwitchboardError::Provider(error.clone());
                warn!(instance_id = %instance_id, error = %err, "Turn ended in the error handler");
            }
            _ => {
                debug!(instance_id = %instance_id, agent_hops = state.agent_hops, "Turn finalized");
            }
        }

        let tenant_id = self
            .pool
            .instance(instance_id)
            .await
            .map(|instance| instance.tenant_id.clone())
            .unwrap_or_default();
        self.usage
            .log_turn(&tenant_id, instance_id, handle.config_hash(), &outcome)
            .await;

        TurnReply {
            conversation_id: state.conversation_id.clone(),
            instance_id: instance_id.to_string(),
            config_hash: handle.config_hash().to_string(),
            response: outcome.response.clone(),
            status: state.status.clone(),
            agent_hops: state.agent_hops,
            duration_ms: outcome.duration.as_millis() as u64,
            usage: state.usage,
        }
    }

    /// Forget a conversation's history.
    pub fn end_conversation(&self, instance_id: &str, conversation_id: &str) -> bool {
        self.conversations
            .remove(&format!("{}:{}", instance_id, conversation_id))
            .is_some()
    }

    /// Drop conversations idle longer than the configured TTL. Returns how
    /// many were dropped.
    pub fn sweep_conversations(&self) -> usize {
        let ttl = self.conversation_config.idle_ttl;
        let mut dropped = 0;
        self.conversations.retain(|_, history| {
            // Held elsewhere: a turn is starting or running
            if Arc::strong_count(history) > 1 {
                return true;
            }
            match history.try_lock() {
                Ok(conversation) if conversation.last_used.elapsed() >= ttl => {
                    dropped += 1;
                    false
                }
                _ => true,
            }
        });
        if dropped > 0 {
            debug!(dropped, "Idle conversations dropped");
        }
        dropped
    }

    /// Run [`SwitchboardService::sweep_conversations`] on the configured interval.
    pub fn spawn_conversation_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        let interval = self.conversation_config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.sweep_conversations();
            }
        })
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Fire-and-forget: every process brings the instance to `tier`.
    pub async fn load(&self, instance_id: &str, tier: Tier) -> Result<()> {
        self.changes.request_load(instance_id, tier).await
    }

    /// Fire-and-forget: every process drains and drops the instance.
    pub async fn unload(&self, instance_id: &str) -> Result<()> {
        self.changes.request_unload(instance_id).await
    }

    pub async fn health_check(&self) -> Vec<InstanceHealth> {
        self.pool.health_check_all().await
    }

    pub async fn create_instance(&self, instance: OrchestratorInstance, tier: Tier) -> Result<OrchestratorInstance> {
        self.changes.create(instance, tier).await
    }

    pub async fn update_instance(&self, instance: &OrchestratorInstance) -> Result<ConfigChange> {
        self.changes.update(instance).await
    }

    /// Drain locally, delete from the store, and broadcast the unload.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<bool> {
        self.pool.remove(instance_id).await;
        let prefix = format!("{}:", instance_id);
        self.conversations.retain(|key, _| !key.starts_with(&prefix));
        self.changes.delete(instance_id).await
    }
}
