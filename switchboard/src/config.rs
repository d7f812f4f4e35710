//! Configuration for Switchboard
//!
//! CLI arguments and environment variable handling using clap, plus the plain
//! config structs the library is built from.

use clap::Parser;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use switchboard_agent::graph::{
    RoleTimeouts, DEFAULT_CONSECUTIVE_ROUTE_LIMIT, DEFAULT_MAX_AGENT_HOPS,
};
use switchboard_agent::{ExecutorSettings, ModelSpec};

/// Switchboard - tiered pool of conversational orchestrators
#[derive(Parser, Debug, Clone)]
#[command(name = "switchboard")]
#[command(about = "Serves many tenant-configured agent orchestrators from one process")]
pub struct Args {
    /// Unique node identifier; stamped on published reload events
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Enable development mode (in-memory store and broker when backends are unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Append per-turn usage events to this JSONL file
    #[arg(long, env = "USAGE_LOG")]
    pub usage_log: Option<PathBuf>,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "switchboard")]
    pub mongodb_db: String,

    /// Maximum number of hot instances
    #[arg(long, env = "MAX_HOT_POOL_SIZE", default_value = "50")]
    pub max_hot_pool_size: usize,

    /// Idle seconds before a warm instance drops to cold
    #[arg(long, env = "WARM_TTL_SECS", default_value = "3600")]
    pub warm_ttl_secs: u64,

    /// Idle seconds before a hot instance drops to warm (unset: only on eviction)
    #[arg(long, env = "HOT_IDLE_TTL_SECS")]
    pub hot_idle_ttl_secs: Option<u64>,

    /// How long a promotion waits for a leased hot slot to free up
    #[arg(long, env = "CAPACITY_WAIT_MS", default_value = "5000")]
    pub capacity_wait_ms: u64,

    /// Seconds to wait for in-flight turns before releasing a replaced executor
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value = "30")]
    pub drain_timeout_secs: u64,

    /// Seconds between pool sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "60")]
    pub sweep_interval_secs: u64,

    /// Build attempts before a promotion fails
    #[arg(long, env = "BUILD_ATTEMPTS", default_value = "3")]
    pub build_attempts: u32,

    /// Initial build retry backoff in milliseconds
    #[arg(long, env = "BUILD_BACKOFF_MS", default_value = "200")]
    pub build_backoff_ms: u64,

    /// Seconds an unreferenced shared resource is kept for reuse
    #[arg(long, env = "RESOURCE_GRACE_SECS", default_value = "300")]
    pub resource_grace_secs: u64,

    /// Seconds between shared-resource reaper runs
    #[arg(long, env = "REAPER_INTERVAL_SECS", default_value = "30")]
    pub reaper_interval_secs: u64,

    /// Prior messages carried into each turn (0 keeps none)
    #[arg(long, env = "HISTORY_LIMIT", default_value = "50")]
    pub history_limit: usize,

    /// Idle seconds before a conversation's history is dropped
    #[arg(long, env = "CONVERSATION_IDLE_SECS", default_value = "3600")]
    pub conversation_idle_secs: u64,

    /// Startup prewarm policy: none, all, or recent:<n>
    #[arg(long, env = "PREWARM", default_value = "none")]
    pub prewarm: PrewarmPolicy,

    /// Seconds between pool statistics log lines
    #[arg(long, env = "STATS_INTERVAL_SECS", default_value = "300")]
    pub stats_interval_secs: u64,

    /// Default model provider
    #[arg(long, env = "DEFAULT_PROVIDER", default_value = "openai")]
    pub default_provider: String,

    /// Default model name
    #[arg(long, env = "DEFAULT_MODEL", default_value = "gpt-4o-mini")]
    pub default_model: String,

    /// Environment variable holding the default provider's API key
    #[arg(long, env = "DEFAULT_CREDENTIAL_ENV", default_value = "OPENAI_API_KEY")]
    pub default_credential_env: String,

    /// Base URL override for the default provider
    #[arg(long, env = "DEFAULT_BASE_URL")]
    pub default_base_url: Option<String>,

    /// Default sampling temperature
    #[arg(long, env = "DEFAULT_TEMPERATURE", default_value = "0.7")]
    pub default_temperature: f32,

    /// Default completion token limit
    #[arg(long, env = "DEFAULT_MAX_TOKENS", default_value = "2048")]
    pub default_max_tokens: u32,

    /// Default maximum plugin routings per turn
    #[arg(long, env = "MAX_AGENT_HOPS", default_value_t = DEFAULT_MAX_AGENT_HOPS)]
    pub max_agent_hops: u32,

    /// Default limit on consecutive routings to one plugin (0 disables)
    #[arg(long, env = "CONSECUTIVE_ROUTE_LIMIT", default_value_t = DEFAULT_CONSECUTIVE_ROUTE_LIMIT)]
    pub consecutive_route_limit: u32,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_hot_pool_size == 0 {
            return Err("MAX_HOT_POOL_SIZE must be at least 1".to_string());
        }

        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err("DEFAULT_TEMPERATURE must be between 0.0 and 2.0".to_string());
        }

        if self.max_agent_hops == 0 {
            return Err("MAX_AGENT_HOPS must be at least 1".to_string());
        }

        if self.build_attempts == 0 {
            return Err("BUILD_ATTEMPTS must be at least 1".to_string());
        }

        if self.default_base_url.is_none()
            && ModelSpec::new(self.default_provider.clone(), "").resolved_base_url().is_err()
        {
            return Err(format!(
                "DEFAULT_BASE_URL is required for provider '{}'",
                self.default_provider
            ));
        }

        Ok(())
    }

    /// Pool settings
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_hot_pool_size: self.max_hot_pool_size,
            warm_ttl: Duration::from_secs(self.warm_ttl_secs),
            hot_idle_ttl: self.hot_idle_ttl_secs.map(Duration::from_secs),
            capacity_wait: Duration::from_millis(self.capacity_wait_ms),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            retry: RetryPolicy {
                max_attempts: self.build_attempts,
                initial_backoff: Duration::from_millis(self.build_backoff_ms),
                ..RetryPolicy::default()
            },
        }
    }

    /// Conversation history settings
    pub fn conversation_config(&self) -> ConversationConfig {
        ConversationConfig {
            history_limit: self.history_limit,
            idle_ttl: Duration::from_secs(self.conversation_idle_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    /// Shared-resource registry settings
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            grace_period: Duration::from_secs(self.resource_grace_secs),
            reap_interval: Duration::from_secs(self.reaper_interval_secs),
        }
    }

    /// Process-wide fall-throughs for instance configuration
    pub fn config_defaults(&self) -> ConfigDefaults {
        let mut model = ModelSpec::new(self.default_provider.clone(), self.default_model.clone())
            .with_credential_env(self.default_credential_env.clone())
            .with_temperature(self.default_temperature)
            .with_max_tokens(self.default_max_tokens);
        model.base_url = self.default_base_url.clone();

        ConfigDefaults {
            model,
            executor: ExecutorSettings::default()
                .with_max_agent_hops(self.max_agent_hops)
                .with_consecutive_route_limit(self.consecutive_route_limit),
        }
    }
}

/// Startup prewarm policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrewarmPolicy {
    /// Start empty
    #[default]
    None,
    /// Promote the N most recently accessed instances
    Recent(usize),
    /// Promote every known instance (bounded by hot capacity)
    All,
}

impl FromStr for PrewarmPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "none" | "" => Ok(PrewarmPolicy::None),
            "all" => Ok(PrewarmPolicy::All),
            other => {
                let count = other
                    .strip_prefix("recent:")
                    .or_else(|| other.strip_prefix("recent"))
                    .ok_or_else(|| format!("unknown prewarm policy '{}'", other))?;
                count
                    .trim()
                    .parse()
                    .map(PrewarmPolicy::Recent)
                    .map_err(|_| format!("invalid prewarm count in '{}'", other))
            }
        }
    }
}

impl fmt::Display for PrewarmPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrewarmPolicy::None => write!(f, "none"),
            PrewarmPolicy::Recent(n) => write!(f, "recent:{}", n),
            PrewarmPolicy::All => write!(f, "all"),
        }
    }
}

/// Build retry schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Tiered pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_hot_pool_size: usize,
    pub warm_ttl: Duration,
    pub hot_idle_ttl: Option<Duration>,
    pub capacity_wait: Duration,
    pub drain_timeout: Duration,
    pub sweep_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_hot_pool_size: 50,
            warm_ttl: Duration::from_secs(3600),
            hot_idle_ttl: None,
            capacity_wait: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Conversation history kept by the service
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Most recent messages kept per conversation
    pub history_limit: usize,
    /// Conversations untouched this long are forgotten
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            idle_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Shared-resource registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a zero-reference resource survives before reaping
    pub grace_period: Duration,
    pub reap_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Process-wide defaults resolved into every effective configuration.
#[derive(Debug, Clone)]
pub struct ConfigDefaults {
    pub model: ModelSpec,
    pub executor: ExecutorSettings,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        Self {
            model: ModelSpec::new("openai", "gpt-4o-mini")
                .with_credential_env("OPENAI_API_KEY")
                .with_temperature(0.7)
                .with_max_tokens(2048),
            executor: ExecutorSettings::default().with_timeouts(RoleTimeouts::default()),
        }
    }
}
