//! Reload events exchanged between processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::instance::{OrchestratorInstance, Tier};

/// Subject prefix for reload events.
pub const RELOAD_SUBJECT_PREFIX: &str = "switchboard.reload";

/// Subscription covering every tenant and instance.
pub const RELOAD_WILDCARD: &str = "switchboard.reload.>";

/// What a receiving process should do with the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReloadAction {
    /// Bring the instance to `tier`
    Load { tier: Tier },
    /// Rebuild if the local copy is stale
    Reload,
    /// Drain and drop the local copy
    Unload,
}

impl fmt::Display for ReloadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadAction::Load { tier } => write!(f, "load:{}", tier),
            ReloadAction::Reload => write!(f, "reload"),
            ReloadAction::Unload => write!(f, "unload"),
        }
    }
}

/// A configuration change broadcast to every process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadEvent {
    pub event_id: Uuid,
    pub instance_id: String,
    pub tenant_id: String,
    /// Hash of the configuration the event refers to
    pub config_hash: String,
    pub action: ReloadAction,
    /// Node id of the publisher
    pub origin: String,
    pub published_at: DateTime<Utc>,
}

impl ReloadEvent {
    pub fn new(
        instance_id: impl Into<String>,
        tenant_id: impl Into<String>,
        config_hash: impl Into<String>,
        action: ReloadAction,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            instance_id: instance_id.into(),
            tenant_id: tenant_id.into(),
            config_hash: config_hash.into(),
            action,
            origin: origin.into(),
            published_at: Utc::now(),
        }
    }

    pub fn load(instance: &OrchestratorInstance, tier: Tier, origin: impl Into<String>) -> Self {
        Self::for_instance(instance, ReloadAction::Load { tier }, origin)
    }

    pub fn reload(instance: &OrchestratorInstance, origin: impl Into<String>) -> Self {
        Self::for_instance(instance, ReloadAction::Reload, origin)
    }

    pub fn unload(instance: &OrchestratorInstance, origin: impl Into<String>) -> Self {
        Self::for_instance(instance, ReloadAction::Unload, origin)
    }

    fn for_instance(instance: &OrchestratorInstance, action: ReloadAction, origin: impl Into<String>) -> Self {
        Self::new(
            instance.instance_id.clone(),
            instance.tenant_id.clone(),
            instance.config_hash.clone(),
            action,
            origin,
        )
    }

    /// Broker subject: `switchboard.reload.<tenant>.<instance>`.
    pub fn subject(&self) -> String {
        format!(
            "{}.{}.{}",
            RELOAD_SUBJECT_PREFIX,
            subject_token(&self.tenant_id),
            subject_token(&self.instance_id)
        )
    }
}

/// Make an id safe to use as one subject token.
fn subject_token(id: &str) -> String {
    let token: String = id
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    if token.is_empty() {
        "_".to_string()
    } else {
        token
    }
}
