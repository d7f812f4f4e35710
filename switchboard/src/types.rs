//! Error taxonomy shared by the pool, registries, store and broker.

use switchboard_agent::{GraphError, ModelError, PluginError};

/// Errors surfaced by Switchboard.
///
/// Every variant carries owned strings so results can be fanned out to all
/// callers of a single-flighted build.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SwitchboardError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Building an executor failed
    #[error("Build failed for {instance_id}: {reason}")]
    Build { instance_id: String, reason: String },

    /// A shared resource could not be created
    #[error("Failed to acquire {kind} {key}: {reason}")]
    ResourceAcquisition {
        kind: String,
        key: String,
        reason: String,
    },

    /// Coordinator produced an unusable routing decision
    #[error("Routing error: {0}")]
    Routing(String),

    /// A turn guard stopped the traversal; expected, not a failure
    #[error("Guard tripped: {0}")]
    GuardTripped(String),

    /// Model provider did not answer in time
    #[error("Provider timed out after {timeout_ms}ms")]
    ProviderTimeout { timeout_ms: u64 },

    /// Model provider failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// Old executor still had leases when its drain window closed
    #[error("Drain of {instance_id} timed out after {timeout_ms}ms with {leases} active lease(s)")]
    DrainTimeout {
        instance_id: String,
        timeout_ms: u64,
        leases: usize,
    },

    /// Configuration store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Reload broker failure
    #[error("Broker error: {0}")]
    Broker(String),

    /// Every hot instance is leased and no slot freed up in time
    #[error("Hot pool saturated: {0}")]
    PoolSaturated(String),

    /// Unknown instance
    #[error("Instance not found: {0}")]
    NotFound(String),
}

impl SwitchboardError {
    /// Whether the pool retries this error with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwitchboardError::Build { .. } | SwitchboardError::ResourceAcquisition { .. }
        )
    }

    pub fn build(instance_id: &str, reason: impl ToString) -> Self {
        SwitchboardError::Build {
            instance_id: instance_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Map a graph error raised while assembling `instance_id`.
    pub fn from_graph(instance_id: &str, err: GraphError) -> Self {
        match err {
            GraphError::Routing(reason) => SwitchboardError::Routing(reason),
            GraphError::Provider { source, .. } => source.into(),
            GraphError::Unsupported { framework, mode } => {
                SwitchboardError::Config(format!("unsupported framework/mode {}/{}", framework, mode))
            }
            other => SwitchboardError::build(instance_id, other),
        }
    }

    /// Map a plugin error raised while assembling `instance_id`.
    pub fn from_plugin(instance_id: &str, err: PluginError) -> Self {
        match err {
            PluginError::InvalidSettings { .. } | PluginError::NotFound(_) => {
                SwitchboardError::Config(err.to_string())
            }
            PluginError::Model(source) => source.into(),
            other => SwitchboardError::build(instance_id, other),
        }
    }
}

impl From<ModelError> for SwitchboardError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Timeout(after) => SwitchboardError::ProviderTimeout {
                timeout_ms: after.as_millis() as u64,
            },
            other => SwitchboardError::Provider(other.to_string()),
        }
    }
}

impl From<mongodb::error::Error> for SwitchboardError {
    fn from(err: mongodb::error::Error) -> Self {
        SwitchboardError::Store(err.to_string())
    }
}

/// Result type alias using SwitchboardError
pub type Result<T> = std::result::Result<T, SwitchboardError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_kinds() {
        assert!(SwitchboardError::build("i1", "boom").is_retryable());
        assert!(SwitchboardError::ResourceAcquisition {
            kind: "model".into(),
            key: "k".into(),
            reason: "r".into()
        }
        .is_retryable());
        assert!(!SwitchboardError::NotFound("i1".into()).is_retryable());
        assert!(!SwitchboardError::Store("down".into()).is_retryable());
    }

    #[test]
    fn test_model_timeout_maps_to_provider_timeout() {
        let err: SwitchboardError = ModelError::Timeout(Duration::from_millis(250)).into();
        assert!(matches!(err, SwitchboardError::ProviderTimeout { timeout_ms: 250 }));

        let err = SwitchboardError::from_graph("i1", GraphError::InvalidGraph("no route".into()));
        assert!(matches!(err, SwitchboardError::Build { .. }));
    }
}
