//! Process-wide plugin registry.
//!
//! Plugins are registered by the host process at startup (or hot-added later)
//! and resolved by reference when an instance is built. The registry is
//! explicit state handed to the pool builder; all mutation goes through its
//! lock.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::contract::{PluginError, PluginFactory, PluginMetadata, PluginRef, LATEST_VERSION};

/// Registry of plugin factories, keyed by plugin id.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    /// Versions per pid, in registration order; the last one is `latest`
    plugins: Arc<RwLock<HashMap<String, Vec<Arc<dyn PluginFactory>>>>>,
}

impl PluginRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any factory with the same pid and version.
    pub async fn register(&self, factory: Arc<dyn PluginFactory>) {
        let meta = factory.metadata().clone();
        let mut plugins = self.plugins.write().await;
        let versions = plugins.entry(meta.pid.clone()).or_default();
        versions.retain(|f| f.metadata().version != meta.version);
        versions.push(factory);

        info!(pid = %meta.pid, version = %meta.version, stateless = meta.stateless, "Plugin registered");
    }

    /// Remove a plugin version (or every version for `latest`).
    pub async fn unregister(&self, plugin_ref: &PluginRef) -> bool {
        let mut plugins = self.plugins.write().await;

        let removed = if plugin_ref.version == LATEST_VERSION {
            plugins.remove(&plugin_ref.pid).is_some()
        } else if let Some(versions) = plugins.get_mut(&plugin_ref.pid) {
            let before = versions.len();
            versions.retain(|f| f.metadata().version != plugin_ref.version);
            let removed = versions.len() != before;
            if versions.is_empty() {
                plugins.remove(&plugin_ref.pid);
            }
            removed
        } else {
            false
        };

        if removed {
            info!(plugin = %plugin_ref, "Plugin unregistered");
        }
        removed
    }

    /// Resolve a reference to a registered factory.
    pub async fn resolve(&self, plugin_ref: &PluginRef) -> Result<Arc<dyn PluginFactory>, PluginError> {
        let plugins = self.plugins.read().await;
        let versions = plugins
            .get(&plugin_ref.pid)
            .ok_or_else(|| PluginError::NotFound(plugin_ref.to_string()))?;

        let found = if plugin_ref.version == LATEST_VERSION {
            versions.last()
        } else {
            versions
                .iter()
                .find(|f| f.metadata().version == plugin_ref.version)
        };

        found
            .cloned()
            .ok_or_else(|| PluginError::NotFound(plugin_ref.to_string()))
    }

    /// Check whether a reference resolves.
    pub async fn contains(&self, plugin_ref: &PluginRef) -> bool {
        self.resolve(plugin_ref).await.is_ok()
    }

    /// Metadata of every registered plugin version.
    pub async fn list(&self) -> Vec<PluginMetadata> {
        let plugins = self.plugins.read().await;
        let mut all: Vec<PluginMetadata> = plugins
            .values()
            .flat_map(|versions| versions.iter().map(|f| f.metadata().clone()))
            .collect();
        all.sort_by(|a, b| a.pid.cmp(&b.pid).then(a.version.cmp(&b.version)));
        all
    }

    /// Number of registered plugin ids.
    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ToolPlugin;

    fn plugin(pid: &str, version: &str) -> Arc<dyn PluginFactory> {
        Arc::new(ToolPlugin::new(
            crate::plugin::PluginMetadata::new(pid, pid, "test").with_version(version),
            "You are a test plugin.",
        ))
    }

    #[tokio::test]
    async fn test_resolve_latest_and_exact() {
        let registry = PluginRegistry::new();
        registry.register(plugin("math", "1.0.0")).await;
        registry.register(plugin("math", "1.1.0")).await;

        let latest = registry.resolve(&PluginRef::latest("math")).await.unwrap();
        assert_eq!(latest.metadata().version, "1.1.0");

        let exact = registry.resolve(&PluginRef::new("math", "1.0.0")).await.unwrap();
        assert_eq!(exact.metadata().version, "1.0.0");

        assert!(registry.resolve(&PluginRef::new("math", "9.9.9")).await.is_err());
        assert!(registry.resolve(&PluginRef::latest("weather")).await.is_err());
    }

    #[tokio::test]
    async fn test_register_replaces_same_version() {
        let registry = PluginRegistry::new();
        registry.register(plugin("math", "1.0.0")).await;
        registry.register(plugin("math", "1.0.0")).await;

        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = PluginRegistry::new();
        registry.register(plugin("math", "1.0.0")).await;
        registry.register(plugin("notes", "2.0.0")).await;

        assert!(registry.unregister(&PluginRef::new("math", "1.0.0")).await);
        assert!(!registry.contains(&PluginRef::latest("math")).await);
        assert!(registry.unregister(&PluginRef::latest("notes")).await);
        assert!(registry.is_empty().await);
    }
}
