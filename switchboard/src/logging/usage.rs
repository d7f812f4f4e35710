//! Usage logging for per-turn accounting
//!
//! Every completed turn produces one `turn_usage` event under the
//! [`USAGE_TARGET`] tracing target. When a file is configured the same event
//! is appended as a JSONL line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use switchboard_agent::backend::Usage;
use switchboard_agent::{TurnOutcome, TurnStatus};

/// Tracing target for usage events
pub const USAGE_TARGET: &str = "switchboard::usage";

/// How a turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Finalizer produced the response
    TurnFinalized,
    /// A guard tripped and Suspend produced the response
    TurnSuspended,
    /// The error handler produced the response
    TurnFailed,
}

impl EventType {
    pub fn from_status(status: &TurnStatus) -> Self {
        match status {
            TurnStatus::Suspended { .. } => EventType::TurnSuspended,
            TurnStatus::Failed { .. } => EventType::TurnFailed,
            TurnStatus::Finalized | TurnStatus::Running => EventType::TurnFinalized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TurnFinalized => "turn_finalized",
            EventType::TurnSuspended => "turn_suspended",
            EventType::TurnFailed => "turn_failed",
        }
    }
}

/// One turn's usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// Process that ran the turn
    pub node_id: String,
    pub instance_id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    /// Hash of the configuration the turn ran on
    pub config_hash: String,
    pub agent_hops: u32,
    pub steps: u32,
    pub duration_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Plugins routed to, in first-use order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,
    /// Suspend reason or failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl UsageEvent {
    /// Build an event from a finished turn
    pub fn from_outcome(
        node_id: &str,
        tenant_id: &str,
        instance_id: &str,
        config_hash: &str,
        outcome: &TurnOutcome,
    ) -> Self {
        let state = &outcome.state;
        let Usage {
            prompt_tokens,
            completion_tokens,
        } = state.usage;
        let detail = match &state.status {
            TurnStatus::Suspended { reason } => Some(reason.to_string()),
            TurnStatus::Failed { error } => Some(error.clone()),
            _ => None,
        };

        Self {
            timestamp: Utc::now(),
            event_type: EventType::from_status(&state.status),
            node_id: node_id.to_string(),
            instance_id: instance_id.to_string(),
            tenant_id: tenant_id.to_string(),
            conversation_id: state.conversation_id.clone(),
            config_hash: config_hash.to_string(),
            agent_hops: state.agent_hops,
            steps: state.steps,
            duration_ms: outcome.duration.as_millis() as u64,
            prompt_tokens,
            completion_tokens,
            plugins: state
                .plugin_context
                .plugins_used()
                .into_iter()
                .map(str::to_string)
                .collect(),
            detail,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Usage logger that emits tracing events and optionally writes JSONL
#[derive(Clone)]
pub struct UsageLogger {
    inner: Arc<Mutex<UsageLoggerInner>>,
    node_id: String,
}

struct UsageLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl UsageLogger {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(UsageLoggerInner {
                writer: None,
                path: None,
            })),
            node_id: node_id.into(),
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Usage logging initialized to {}", path.display());
        Ok(())
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    /// Log a finished turn
    pub async fn log_turn(&self, tenant_id: &str, instance_id: &str, config_hash: &str, outcome: &TurnOutcome) {
        let event = UsageEvent::from_outcome(&self.node_id, tenant_id, instance_id, config_hash, outcome);
        self.log(event).await;
    }

    /// Log a usage event
    pub async fn log(&self, event: UsageEvent) {
        info!(
            target: USAGE_TARGET,
            event = "turn_usage",
            kind = event.event_type.as_str(),
            instance_id = %event.instance_id,
            tenant_id = %event.tenant_id,
            conversation_id = %event.conversation_id,
            agent_hops = event.agent_hops,
            steps = event.steps,
            duration_ms = event.duration_ms,
            tokens = event.total_tokens(),
            "turn_usage"
        );

        let mut inner = self.inner.lock().await;
        let Some(writer) = inner.writer.as_mut() else {
            return;
        };

        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize usage event: {}", e);
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{}", jsonl) {
            error!("Failed to write usage event: {}", e);
        }
        if let Err(e) = writer.flush() {
            error!("Failed to flush usage log: {}", e);
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}
