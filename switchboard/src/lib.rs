//! Switchboard - tiered pool of conversational orchestrators
//!
//! Serves many tenant-configured orchestrators from one process without
//! rebuilding them per request or restarting on configuration changes.
//!
//! ## Components
//!
//! - **Pool**: Cold/Warm/Hot lifecycle, single-flighted builds, bounded hot
//!   tier with LRU eviction, leases
//! - **Resources**: refcounted model clients, graph templates and plugin
//!   bundles with grace-period reaping
//! - **Changes**: config hashing, validation and change broadcast
//! - **Reload**: NATS or in-memory fan-out of load/reload/unload events
//! - **Store**: MongoDB or in-memory instance configuration
//!
//! ```text
//!  config write ──▶ ChangeDetector ──▶ ConfigStore
//!                          │
//!                          ▼ publish
//!                    ReloadBroker ──────▶ ReloadConsumer (every process)
//!                                                │
//!  turn ──▶ SwitchboardService ──resolve──▶ PoolManager ◀┘
//!                                                │ build
//!                                                ▼
//!                                  InstanceBuilder ──▶ SharedResources
//! ```

pub mod changes;
pub mod config;
pub mod flight;
pub mod hashing;
pub mod instance;
pub mod logging;
pub mod pool;
pub mod reload;
pub mod resources;
pub mod service;
pub mod store;
pub mod types;

pub use changes::{ChangeDetector, ConfigChange};
pub use config::{Args, ConfigDefaults, ConversationConfig, PoolConfig, PrewarmPolicy, RegistryConfig};
pub use instance::{OrchestratorInstance, Tier};
pub use pool::{ExecutorHandle, InstanceBuilder, PoolManager, PoolStats, ReloadOutcome};
pub use reload::{ReloadBroker, ReloadConsumer, ReloadEvent};
pub use resources::SharedResources;
pub use service::{SwitchboardService, TurnReply, TurnRequest};
pub use store::ConfigStore;
pub use types::{Result, SwitchboardError};
