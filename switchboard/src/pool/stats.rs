//! Pool reports for the operations surface.

use serde::Serialize;
use std::collections::BTreeMap;

use switchboard_agent::plugin::PluginHealth;

use crate::resources::RegistryStats;

/// Rough per-instance memory estimates by tier.
pub const COLD_INSTANCE_BYTES: u64 = 100;
pub const WARM_INSTANCE_BYTES: u64 = 4 * 1024;
pub const HOT_INSTANCE_BYTES: u64 = 20 * 1024 * 1024;

/// Snapshot of the pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub cold: usize,
    pub warm: usize,
    pub hot: usize,
    /// Turns in flight across all hot instances
    pub leases: usize,
    pub hot_capacity: usize,
    pub estimated_memory_bytes: u64,
    pub resources: Vec<RegistryStats>,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.cold + self.warm + self.hot
    }

    pub fn estimate_memory(cold: usize, warm: usize, hot: usize) -> u64 {
        cold as u64 * COLD_INSTANCE_BYTES
            + warm as u64 * WARM_INSTANCE_BYTES
            + hot as u64 * HOT_INSTANCE_BYTES
    }
}

/// Plugin health of one hot instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealth {
    pub instance_id: String,
    pub config_hash: String,
    pub plugins: BTreeMap<String, PluginHealth>,
}

impl InstanceHealth {
    pub fn is_healthy(&self) -> bool {
        self.plugins.values().all(PluginHealth::is_healthy)
    }
}

/// Result of one sweeper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub hot_to_warm: usize,
    pub warm_to_cold: usize,
    pub access_flushed: usize,
}

/// Result of a startup prewarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrewarmReport {
    pub requested: usize,
    pub promoted: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_estimate() {
        assert_eq!(PoolStats::estimate_memory(0, 0, 0), 0);
        assert_eq!(
            PoolStats::estimate_memory(10, 2, 1),
            1000 + 8192 + 20 * 1024 * 1024
        );
    }

    #[test]
    fn test_instance_health() {
        let mut health = InstanceHealth {
            instance_id: "i1".into(),
            config_hash: "h".into(),
            plugins: BTreeMap::new(),
        };
        health.plugins.insert("math@latest".into(), PluginHealth::Healthy);
        assert!(health.is_healthy());

        health.plugins.insert(
            "weather@latest".into(),
            PluginHealth::Degraded {
                reason: "slow upstream".into(),
            },
        );
        assert!(!health.is_healthy());
    }
}
