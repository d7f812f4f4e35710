//! Shared compiled graph templates.

use std::sync::Arc;
use std::time::Duration;

use switchboard_agent::plugin::PluginMetadata;
use switchboard_agent::{GraphTemplate, PluginRef};

use super::registry::{RegistryStats, SharedHandle, SharedRegistry};
use crate::types::{Result, SwitchboardError};

pub type TemplateHandle = SharedHandle<GraphTemplate>;

/// Templates keyed by framework, mode and sorted plugin set.
#[derive(Clone)]
pub struct TemplateRegistry {
    registry: SharedRegistry<GraphTemplate>,
}

impl TemplateRegistry {
    pub fn new(grace: Duration) -> Self {
        Self {
            registry: SharedRegistry::new("template", grace),
        }
    }

    pub async fn acquire(
        &self,
        framework: &str,
        mode: &str,
        plugins: &[(PluginRef, PluginMetadata)],
    ) -> Result<TemplateHandle> {
        let refs: Vec<PluginRef> = plugins.iter().map(|(r, _)| r.clone()).collect();
        let key = GraphTemplate::cache_key(framework, mode, &refs);

        self.registry
            .acquire(&key, || async {
                GraphTemplate::compile(framework, mode, plugins)
                    .map(Arc::new)
                    .map_err(|e| SwitchboardError::ResourceAcquisition {
                        kind: "template".to_string(),
                        key: key.clone(),
                        reason: e.to_string(),
                    })
            })
            .await
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

    #[tokio::test]
    async fn test_plugin_order_shares_template() {
        let registry = TemplateRegistry::new(Duration::from_secs(60));
        let math = (PluginRef::latest("math"), PluginMetadata::new("math", "math", "Arithmetic"));
        let notes = (PluginRef::latest("notes"), PluginMetadata::new("notes", "notes", "Notes"));

        let a = registry
            .acquire("graph", "coordinator", &[math.clone(), notes.clone()])
            .await
            .unwrap();
        let b = registry.acquire("graph", "coordinator", &[notes, math]).await.unwrap();

        assert_eq!(a.key(), b.key());
        assert_eq!(registry.refcount(a.key()), Some(2));
        assert!(a.route("math").is_some());
    }

    #[tokio::test]
    async fn test_unsupported_mode_fails() {
        let registry = TemplateRegistry::new(Duration::from_secs(60));
        assert!(registry.acquire("graph", "swarm", &[]).await.is_err());
        assert_eq!(registry.stats().entries, 0);
    }
}
