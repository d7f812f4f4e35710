//! MongoDB configuration store.
//!
//! One document per instance in the `instances` collection, keyed by the
//! instance id. Timestamps are stored as BSON dates so recency queries sort
//! server-side.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use switchboard_agent::PluginRef;

use super::ConfigStore;
use crate::instance::{InstanceConfig, OrchestratorInstance, Tier};
use crate::types::{Result, SwitchboardError};

/// Collection holding instance documents.
pub const INSTANCES_COLLECTION: &str = "instances";

/// Duplicate key error code.
const DUPLICATE_KEY: i32 = 11000;

/// Stored form of an [`OrchestratorInstance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceDocument {
    #[serde(rename = "_id")]
    instance_id: String,
    tenant_id: String,
    name: String,
    framework: String,
    mode: String,
    plugins: Vec<PluginRef>,
    #[serde(default)]
    config: InstanceConfig,
    #[serde(default)]
    config_hash: String,
    #[serde(default)]
    tier: Tier,
    #[serde(default)]
    last_accessed_at: Option<bson::DateTime>,
    created_at: bson::DateTime,
    updated_at: bson::DateTime,
}

impl From<&OrchestratorInstance> for InstanceDocument {
    fn from(instance: &OrchestratorInstance) -> Self {
        Self {
            instance_id: instance.instance_id.clone(),
            tenant_id: instance.tenant_id.clone(),
            name: instance.name.clone(),
            framework: instance.framework.clone(),
            mode: instance.mode.clone(),
            plugins: instance.plugins.clone(),
            config: instance.config.clone(),
            config_hash: instance.config_hash.clone(),
            tier: instance.tier,
            last_accessed_at: instance.last_accessed_at.map(bson::DateTime::from_chrono),
            created_at: bson::DateTime::from_chrono(instance.created_at),
            updated_at: bson::DateTime::from_chrono(instance.updated_at),
        }
    }
}

impl From<InstanceDocument> for OrchestratorInstance {
    fn from(document: InstanceDocument) -> Self {
        Self {
            instance_id: document.instance_id,
            tenant_id: document.tenant_id,
            name: document.name,
            framework: document.framework,
            mode: document.mode,
            plugins: document.plugins,
            config: document.config,
            config_hash: document.config_hash,
            tier: document.tier,
            last_accessed_at: document.last_accessed_at.map(|at| at.to_chrono()),
            created_at: document.created_at.to_chrono(),
            updated_at: document.updated_at.to_chrono(),
        }
    }
}

/// Configuration store backed by MongoDB.
#[derive(Clone)]
pub struct MongoConfigStore {
    instances: Collection<InstanceDocument>,
}

impl MongoConfigStore {
    /// Connect, verify the connection and ensure indexes exist.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast when MongoDB is unreachable
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| SwitchboardError::Store(format!("Failed to connect to MongoDB: {}", e)))?;

        let database = client.database(db_name);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| SwitchboardError::Store(format!("MongoDB ping failed: {}", e)))?;

        let store = Self {
            instances: database.collection(INSTANCES_COLLECTION),
        };
        store.apply_indexes().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(store)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let indexes = vec![
            IndexModel::builder().keys(doc! { "tenant_id": 1 }).build(),
            IndexModel::builder().keys(doc! { "last_accessed_at": -1 }).build(),
        ];

        self.instances
            .create_indexes(indexes)
            .await
            .map_err(|e| SwitchboardError::Store(format!("Failed to create indexes: {}", e)))?;
        Ok(())
    }

    /// Ids of documents matching `filter`, in `sort` order.
    async fn ids(&self, filter: Document, sort: Document, limit: Option<i64>) -> Result<Vec<String>> {
        let raw = self.instances.clone_with_type::<Document>();
        let mut find = raw.find(filter).sort(sort).projection(doc! { "_id": 1 });
        if let Some(limit) = limit {
            find = find.limit(limit);
        }

        let cursor = find
            .await
            .map_err(|e| SwitchboardError::Store(format!("Find failed: {}", e)))?;

        let ids: Vec<String> = cursor
            .filter_map(|document| async move {
                match document {
                    Ok(d) => d.get_str("_id").ok().map(str::to_string),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(ids)
    }
}

#[async_trait]
impl ConfigStore for MongoConfigStore {
    async fn get_instance_config(&self, instance_id: &str) -> Result<OrchestratorInstance> {
        self.instances
            .find_one(doc! { "_id": instance_id })
            .await
            .map_err(|e| SwitchboardError::Store(format!("Find failed: {}", e)))?
            .map(OrchestratorInstance::from)
            .ok_or_else(|| SwitchboardError::NotFound(instance_id.to_string()))
    }

    async fn persist_instance_config(&self, instance: &OrchestratorInstance) -> Result<()> {
        let document = InstanceDocument::from(instance);
        let config = bson::to_bson(&document.config)
            .map_err(|e| SwitchboardError::Store(format!("Failed to encode config: {}", e)))?;
        let plugins: Vec<Bson> = document
            .plugins
            .iter()
            .map(|p| Bson::String(p.to_string()))
            .collect();

        let result = self
            .instances
            .update_one(
                doc! { "_id": document.instance_id.as_str() },
                doc! {
                    "$set": {
                        "name": document.name.as_str(),
                        "plugins": plugins,
                        "config": config,
                        "config_hash": document.config_hash.as_str(),
                        "tier": document.tier.to_string(),
                        "updated_at": document.updated_at,
                    }
                },
            )
            .await
            .map_err(|e| SwitchboardError::Store(format!("Update failed: {}", e)))?;

        if result.matched_count == 0 {
            return Err(SwitchboardError::NotFound(instance.instance_id.clone()));
        }
        Ok(())
    }

    async fn list_active_plugins(&self, tenant_id: &str) -> Result<Vec<PluginRef>> {
        let values = self
            .instances
            .distinct("plugins", doc! { "tenant_id": tenant_id })
            .await
            .map_err(|e| SwitchboardError::Store(format!("Distinct failed: {}", e)))?;

        let mut plugins: Vec<PluginRef> = values
            .iter()
            .filter_map(Bson::as_str)
            .filter_map(|s| s.parse().ok())
            .collect();
        plugins.sort();
        plugins.dedup();
        Ok(plugins)
    }

    async fn create_instance(&self, instance: &OrchestratorInstance) -> Result<()> {
        match self.instances.insert_one(InstanceDocument::from(instance)).await {
            Ok(_) => Ok(()),
            Err(e) => match *e.kind {
                ErrorKind::Write(WriteFailure::WriteError(ref failure)) if failure.code == DUPLICATE_KEY => {
                    Err(SwitchboardError::Config(format!(
                        "instance {} already exists",
                        instance.instance_id
                    )))
                }
                _ => Err(SwitchboardError::Store(format!("Insert failed: {}", e))),
            },
        }
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool> {
        let result = self
            .instances
            .delete_one(doc! { "_id": instance_id })
            .await
            .map_err(|e| SwitchboardError::Store(format!("Delete failed: {}", e)))?;
        Ok(result.deleted_count > 0)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.ids(
            doc! { "last_accessed_at": { "$ne": Bson::Null } },
            doc! { "last_accessed_at": -1 },
            Some(limit as i64),
        )
        .await
    }

    async fn list_all(&self) -> Result<Vec<String>> {
        self.ids(doc! {}, doc! { "_id": 1 }, None).await
    }

    async fn record_access(&self, instance_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.instances
            .update_one(
                doc! { "_id": instance_id },
                doc! { "$set": { "last_accessed_at": bson::DateTime::from_chrono(at) } },
            )
            .await
            .map_err(|e| SwitchboardError::Store(format!("Update failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Round trips against a live server need a running MongoDB instance

    #[test]
    fn test_document_conversion_keeps_instance() {
        let mut instance = OrchestratorInstance::new("t1", "bot")
            .with_id("i1")
            .with_plugin("math@1.0".parse().unwrap());
        instance.config_hash = "feed".into();
        instance.tier = Tier::Hot;

        let document = InstanceDocument::from(&instance);
        let encoded = bson::to_document(&document).unwrap();
        assert_eq!(encoded.get_str("_id").unwrap(), "i1");
        assert_eq!(encoded.get_str("tier").unwrap(), "hot");

        let decoded: InstanceDocument = bson::from_document(encoded).unwrap();
        let back = OrchestratorInstance::from(decoded);
        assert_eq!(back.instance_id, "i1");
        assert_eq!(back.plugins, instance.plugins);
        assert_eq!(back.config_hash, "feed");
        // BSON dates keep millisecond precision
        assert_eq!(
            back.created_at.timestamp_millis(),
            instance.created_at.timestamp_millis()
        );
    }
}
