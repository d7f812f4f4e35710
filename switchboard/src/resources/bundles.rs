//! Plugin bundles: shared when the plugin is stateless, exclusive otherwise.

use std::sync::Arc;
use std::time::Duration;

use switchboard_agent::{ModelClient, PluginBundle, PluginFactory, PluginRef};

use super::registry::{RegistryStats, SharedHandle, SharedRegistry};
use crate::hashing::digest_json;
use crate::types::{Result, SwitchboardError};

/// A bundle held by one built instance.
pub enum BundleHandle {
    /// Reference into the shared registry
    Shared(SharedHandle<PluginBundle>),
    /// Stateful bundle owned by a single instance
    Exclusive(Arc<PluginBundle>),
}

impl BundleHandle {
    pub fn bundle(&self) -> Arc<PluginBundle> {
        match self {
            BundleHandle::Shared(handle) => handle.value(),
            BundleHandle::Exclusive(bundle) => bundle.clone(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, BundleHandle::Shared(_))
    }
}

/// Stateless bundles keyed by plugin ref, settings digest and bound model.
#[derive(Clone)]
pub struct BundleRegistry {
    registry: SharedRegistry<PluginBundle>,
}

impl BundleRegistry {
    pub fn new(grace: Duration) -> Self {
        Self {
            registry: SharedRegistry::new("bundle", grace),
        }
    }

    pub fn key(plugin_ref: &PluginRef, settings: &serde_json::Value, model_key: &str) -> String {
        format!("{}|{}|{}", plugin_ref, digest_json(settings), model_key)
    }

    /// Bind `factory` to `model`, sharing the result when the plugin is stateless.
    pub async fn acquire(
        &self,
        plugin_ref: &PluginRef,
        factory: Arc<dyn PluginFactory>,
        settings: &serde_json::Value,
        model_key: &str,
        model: Arc<dyn ModelClient>,
    ) -> Result<BundleHandle> {
        let metadata = factory.metadata().clone();
        let build = || async {
            let agent = factory.create_agent(model, settings).map_err(|e| {
                SwitchboardError::ResourceAcquisition {
                    kind: "bundle".to_string(),
                    key: plugin_ref.to_string(),
                    reason: e.to_string(),
                }
            })?;
            Ok::<_, SwitchboardError>(Arc::new(PluginBundle::new(
                plugin_ref.clone(),
                metadata.clone(),
                agent,
            )))
        };

        if !metadata.stateless {
            return build().await.map(BundleHandle::Exclusive);
        }

        let key = Self::key(plugin_ref, settings, model_key);
        self.registry.acquire(&key, build).await.map(BundleHandle::Shared)
    }

    pub fn refcount(&self, key: &str) -> Option<usize> {
        self.registry.refcount(key)
    }

    pub fn reap(&self) -> usize {
        self.registry.reap()
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_agent::backend::MockModel;
    use switchboard_agent::plugin::{PluginMetadata, ToolPlugin};

    fn model() -> Arc<dyn ModelClient> {
        Arc::new(MockModel::default())
    }

    #[tokio::test]
    async fn test_stateless_bundles_are_shared() {
        let registry = BundleRegistry::new(Duration::from_secs(60));
        let factory: Arc<dyn PluginFactory> =
            Arc::new(ToolPlugin::new(PluginMetadata::new("math", "math", "Arithmetic"), "Solve."));
        let plugin_ref = PluginRef::latest("math");
        let settings = serde_json::Value::Null;

        let a = registry
            .acquire(&plugin_ref, factory.clone(), &settings, "m1", model())
            .await
            .unwrap();
        let b = registry
            .acquire(&plugin_ref, factory.clone(), &settings, "m1", model())
            .await
            .unwrap();
        assert!(a.is_shared());
        assert!(Arc::ptr_eq(&a.bundle(), &b.bundle()));

        let key = BundleRegistry::key(&plugin_ref, &settings, "m1");
        assert_eq!(registry.refcount(&key), Some(2));

        // Another model means another bundle
        let c = registry
            .acquire(&plugin_ref, factory, &settings, "m2", model())
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a.bundle(), &c.bundle()));
    }

    #[tokio::test]
    async fn test_stateful_bundles_are_exclusive() {
        let registry = BundleRegistry::new(Duration::from_secs(60));
        let factory: Arc<dyn PluginFactory> = Arc::new(ToolPlugin::new(
            PluginMetadata::new("notes", "notes", "Remembers things").stateful(),
            "Keep notes.",
        ));
        let plugin_ref = PluginRef::latest("notes");

        let a = registry
            .acquire(&plugin_ref, factory.clone(), &serde_json::Value::Null, "m1", model())
            .await
            .unwrap();
        let b = registry
            .acquire(&plugin_ref, factory, &serde_json::Value::Null, "m1", model())
            .await
            .unwrap();

        assert!(!a.is_shared());
        assert!(!Arc::ptr_eq(&a.bundle(), &b.bundle()));
        assert_eq!(registry.stats().entries, 0);
    }
}
