//! Model client construction from declarative model specs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::openai::OpenAiClient;
use super::traits::{ModelClient, ModelError};

/// Declarative description of a model client.
///
/// Everything that changes provider behaviour lives here, so two equal specs
/// can share one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider name (`openai`, `vllm`, `ollama`, `together`, ...)
    pub provider: String,
    /// Model name at the provider
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    /// Override for the provider base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            credential_env: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_credential_env(mut self, var: impl Into<String>) -> Self {
        self.credential_env = Some(var.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Base URL for the provider, honouring an explicit override.
    pub fn resolved_base_url(&self) -> Result<String, ModelError> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }
        match self.provider.as_str() {
            "openai" => Ok("https://api.openai.com/v1".to_string()),
            "together" => Ok("https://api.together.xyz/v1".to_string()),
            "ollama" => Ok("http://localhost:11434/v1".to_string()),
            "vllm" => Ok("http://localhost:8000/v1".to_string()),
            other => Err(ModelError::Unavailable(format!(
                "Unknown provider '{}' and no base_url given",
                other
            ))),
        }
    }
}

/// Builds model clients from specs.
pub trait ModelClientFactory: Send + Sync {
    fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelClient>, ModelError>;
}

/// Factory for OpenAI-compatible providers; reads credentials from the environment.
#[derive(Debug, Default, Clone)]
pub struct ProviderClientFactory;

impl ModelClientFactory for ProviderClientFactory {
    fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn ModelClient>, ModelError> {
        let api_key = match &spec.credential_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ModelError::Credential(format!("Environment variable {} is not set", var))
            })?),
            None => None,
        };

        let client = OpenAiClient::new(spec.resolved_base_url()?, spec.model.clone(), api_key)?
            .with_sampling(spec.temperature, spec.max_tokens);

        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_needs_base_url() {
        let spec = ModelSpec::new("acme", "m1");
        assert!(spec.resolved_base_url().is_err());

        let spec = ModelSpec {
            base_url: Some("http://acme.local/v1".to_string()),
            ..spec
        };
        assert_eq!(spec.resolved_base_url().unwrap(), "http://acme.local/v1");
    }

    #[test]
    fn test_missing_credential_is_reported() {
        let spec = ModelSpec::new("openai", "gpt-4o-mini")
            .with_credential_env("SWITCHBOARD_TEST_KEY_THAT_IS_NOT_SET");
        let result = ProviderClientFactory.create(&spec);
        assert!(matches!(result, Err(ModelError::Credential(_))));
    }
}
