//! Shared model clients.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use switchboard_agent::{ModelClient, ModelClientFactory, ModelSpec};

use super::registry::{RegistryStats, SharedHandle, SharedRegistry};
use crate::types::{Result, SwitchboardError};

pub type ModelHandle = SharedHandle<dyn ModelClient>;

/// Model clients keyed by provider, model, credential and sampling.
#[derive(Clone)]
pub struct ModelRegistry {
    registry: SharedRegistry<dyn ModelClient>,
    factory: Arc<dyn ModelClientFactory>,
}

impl ModelRegistry {
    pub fn new(factory: Arc<dyn ModelClientFactory>, grace: Duration) -> Self {
        Self {
            registry: SharedRegistry::new("model", grace),
            factory,
        }
    }

    /// Content key for `spec`.
    ///
    /// The credential is fingerprinted rather than embedded, so a rotated key
    /// yields a new client without the secret appearing in logs.
    pub fn key(spec: &ModelSpec) -> String {
        let credential = spec
            .credential_env
            .as_deref()
            .map(|var| {
                let secret = std::env::var(var).unwrap_or_default();
                let digest = hex::encode(Sha256::digest(format!("{}={}", var, secret).as_bytes()));
                digest[..12].to_string()
            })
            .unwrap_or_else(|| "anon".to_string());

        let temperature = spec
            .temperature
            .map(|t| format!("{:.2}", t))
            .unwrap_or_else(|| "-".to_string());
        let max_tokens = spec
            .max_tokens
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());

        format!(
            "{}:{}:{}:{}:{}:{}",
            spec.provider,
            spec.model,
            spec.base_url.as_deref().unwrap_or("default"),
            credential,
            temperature,
            max_tokens
        )
    }

    /// Acquire a client for `spec`, creating it on first use.
    pub async fn acquire(&self, spec: &ModelSpec) -> Result<ModelHandle> {
        let key = Self::key(spec);
        let factory = self.factory.clone();
        self.registry
            .acquire(&key, || async {
                factory
                    .create(spec)
                    .map_err(|e| SwitchboardError::ResourceAcquisition {
                        kind: "model".to_string(),
                        key: key.clone(),
                        reason: e.to_string(),
                    })
            })
            .await
    }

    pub fn refcount(&self, spec: &ModelSpec) -> Option<usize> {
        self.registry.refcount(&Self::key(spec))
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
    use switchboard_agent::ModelError;

    struct MockFactory;

    impl ModelClientFactory for MockFactory {
        fn create(&self, spec: &ModelSpec) -> std::result::Result<Arc<dyn ModelClient>, ModelError> {
            if spec.model == "broken" {
                return Err(ModelError::Unavailable("no such model".into()));
            }
            Ok(Arc::new(MockModel::new(spec.model.clone())))
        }
    }

    #[test]
    fn test_key_separates_sampling_and_credentials() {
        let base = ModelSpec::new("openai", "gpt-4o-mini").with_temperature(0.7);
        let hotter = base.clone().with_temperature(1.2);
        let other_cred = base.clone().with_credential_env("SWITCHBOARD_TEST_OTHER_KEY");

        assert_ne!(ModelRegistry::key(&base), ModelRegistry::key(&hotter));
        assert_ne!(ModelRegistry::key(&base), ModelRegistry::key(&other_cred));
        assert_eq!(ModelRegistry::key(&base), ModelRegistry::key(&base.clone()));
        assert!(!ModelRegistry::key(&other_cred).contains("SWITCHBOARD_TEST_OTHER_KEY"));
    }

    #[tokio::test]
    async fn test_acquire_shares_clients() {
        let registry = ModelRegistry::new(Arc::new(MockFactory), Duration::from_secs(60));
        let spec = ModelSpec::new("openai", "gpt-4o-mini");

        let a = registry.acquire(&spec).await.unwrap();
        let b = registry.acquire(&spec).await.unwrap();
        assert!(Arc::ptr_eq(&a.value(), &b.value()));
        assert_eq!(registry.refcount(&spec), Some(2));

        let err = registry.acquire(&ModelSpec::new("openai", "broken")).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::ResourceAcquisition { .. }));
    }
}
