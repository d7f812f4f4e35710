//! Shared resource registries.
//!
//! - `registry`: generic refcounted registry with grace-period reaping
//! - `models`: model clients
//! - `templates`: compiled graph templates
//! - `bundles`: stateless plugin bundles

pub mod bundles;
pub mod models;
pub mod registry;
pub mod templates;

pub use bundles::{BundleHandle, BundleRegistry};
pub use models::{ModelHandle, ModelRegistry};
pub use registry::{RegistryStats, SharedHandle, SharedRegistry};
pub use templates::{TemplateHandle, TemplateRegistry};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use switchboard_agent::ModelClientFactory;

use crate::config::RegistryConfig;

/// The three registries a pool builds from.
#[derive(Clone)]
pub struct SharedResources {
    pub models: ModelRegistry,
    pub templates: TemplateRegistry,
    pub bundles: BundleRegistry,
    config: RegistryConfig,
}

impl SharedResources {
    pub fn new(factory: Arc<dyn ModelClientFactory>, config: RegistryConfig) -> Self {
        Self {
            models: ModelRegistry::new(factory, config.grace_period),
            templates: TemplateRegistry::new(config.grace_period),
            bundles: BundleRegistry::new(config.grace_period),
            config,
        }
    }

    /// Reap every registry; returns the number of entries removed.
    pub fn reap(&self) -> usize {
        // Bundles hold model clients, so they go first
        self.bundles.reap() + self.templates.reap() + self.models.reap()
    }

    pub fn stats(&self) -> Vec<RegistryStats> {
        vec![self.models.stats(), self.templates.stats(), self.bundles.stats()]
    }

    /// Periodically reap idle resources.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let resources = self.clone();
        let interval = self.config.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = resources.reap();
                if reaped > 0 {
                    debug!(reaped, "Reaped idle shared resources");
                }
            }
        })
    }
}
