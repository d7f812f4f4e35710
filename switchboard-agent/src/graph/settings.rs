//! Executor limits, role timeouts and fallback responses.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum plugin routings per turn.
pub const DEFAULT_MAX_AGENT_HOPS: u32 = 15;

/// Default limit on routing to the same plugin back to back.
pub const DEFAULT_CONSECUTIVE_ROUTE_LIMIT: u32 = 3;

/// Node executions allowed beyond four per hop when the step limit is derived.
pub const STEP_LIMIT_HEADROOM: u32 = 10;

/// Role-specific timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTimeouts {
    pub coordinator_ms: u64,
    pub plugin_agent_ms: u64,
    pub tool_ms: u64,
    pub suspend_ms: u64,
    pub finalizer_ms: u64,
}

impl Default for RoleTimeouts {
    fn default() -> Self {
        Self {
            coordinator_ms: 60_000,
            plugin_agent_ms: 120_000,
            tool_ms: 60_000,
            suspend_ms: 30_000,
            finalizer_ms: 60_000,
        }
    }
}

impl RoleTimeouts {
    pub fn coordinator(&self) -> Duration {
        Duration::from_millis(self.coordinator_ms)
    }

    pub fn plugin_agent(&self) -> Duration {
        Duration::from_millis(self.plugin_agent_ms)
    }

    pub fn tool(&self) -> Duration {
        Duration::from_millis(self.tool_ms)
    }

    pub fn suspend(&self) -> Duration {
        Duration::from_millis(self.suspend_ms)
    }

    pub fn finalizer(&self) -> Duration {
        Duration::from_millis(self.finalizer_ms)
    }
}

/// Canned responses used when a terminal node cannot reach its model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackResponses {
    /// `{reason}` is replaced with the suspension reason
    pub suspend: String,
    pub finalizer: String,
    pub error: String,
}

impl Default for FallbackResponses {
    fn default() -> Self {
        Self {
            suspend: "I had to pause here ({reason}). Here is what I have so far; ask me to continue if you need more.".to_string(),
            finalizer: "I gathered some information but could not put together a full answer in time. Please try again.".to_string(),
            error: "Something went wrong while handling your request. Please try again in a moment.".to_string(),
        }
    }
}

/// Everything that bounds and shapes one executor's turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub max_agent_hops: u32,
    /// 0 disables the consecutive-route guard
    pub consecutive_route_limit: u32,
    /// 0 derives the limit from `max_agent_hops`
    pub step_limit: u32,
    pub timeouts: RoleTimeouts,
    pub fallbacks: FallbackResponses,
    /// Route provider errors through the error handler node
    pub error_handler: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_agent_hops: DEFAULT_MAX_AGENT_HOPS,
            consecutive_route_limit: DEFAULT_CONSECUTIVE_ROUTE_LIMIT,
            step_limit: 0,
            timeouts: RoleTimeouts::default(),
            fallbacks: FallbackResponses::default(),
            error_handler: true,
        }
    }
}

impl ExecutorSettings {
    pub fn with_max_agent_hops(mut self, hops: u32) -> Self {
        self.max_agent_hops = hops;
        self
    }

    pub fn with_consecutive_route_limit(mut self, limit: u32) -> Self {
        self.consecutive_route_limit = limit;
        self
    }

    pub fn with_step_limit(mut self, limit: u32) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn with_timeouts(mut self, timeouts: RoleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Bound on node executions per turn.
    ///
    /// A hop costs at most four steps (coordinator, control tools, agent,
    /// tools), so the derived limit never trips before the hop guard.
    pub fn effective_step_limit(&self) -> u32 {
        if self.step_limit > 0 {
            self.step_limit
        } else {
            self.max_agent_hops
                .saturating_mul(4)
                .saturating_add(STEP_LIMIT_HEADROOM)
        }
    }
}


/// Optional per-instance replacements for terminal and coordinator prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalizer: Option<String>,
}
