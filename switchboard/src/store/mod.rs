//! Configuration store.
//!
//! The pool loads instance configuration from a [`ConfigStore`] when an id is
//! unknown locally, and the change detector persists through it. A store
//! failure fails the request in flight, never the process.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use switchboard_agent::PluginRef;

use crate::instance::OrchestratorInstance;
use crate::types::Result;

pub use memory::InMemoryConfigStore;
pub use mongo::MongoConfigStore;

/// Persistent home of instance configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load one instance; `NotFound` when it does not exist.
    async fn get_instance_config(&self, instance_id: &str) -> Result<OrchestratorInstance>;

    /// Overwrite an existing instance's configuration and hash.
    async fn persist_instance_config(&self, instance: &OrchestratorInstance) -> Result<()>;

    /// Distinct plugins referenced by a tenant's instances.
    async fn list_active_plugins(&self, tenant_id: &str) -> Result<Vec<PluginRef>>;

    /// Insert a new instance; an existing id is a configuration error.
    async fn create_instance(&self, instance: &OrchestratorInstance) -> Result<()>;

    /// Remove an instance. Returns whether it existed.
    async fn delete_instance(&self, instance_id: &str) -> Result<bool>;

    /// Most recently accessed instance ids, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<String>>;

    /// Every known instance id.
    async fn list_all(&self) -> Result<Vec<String>>;

    /// Record the last time an instance served a request.
    async fn record_access(&self, instance_id: &str, at: DateTime<Utc>) -> Result<()>;
}
