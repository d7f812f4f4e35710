//! Applies reload events to the local pool.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broker::ReloadBroker;
use super::events::{ReloadAction, ReloadEvent};
use crate::pool::{PoolManager, ReloadOutcome};
use crate::types::Result;

/// Subscribes to the broker and keeps the local pool in step with it.
///
/// Events for different instances are applied concurrently; events for one
/// instance are applied one at a time, in publish order. Repeated events are
/// absorbed by the hash comparison in [`PoolManager::reload`].
pub struct ReloadConsumer {
    pool: Arc<PoolManager>,
    broker: Arc<dyn ReloadBroker>,
}

impl ReloadConsumer {
    pub fn new(pool: Arc<PoolManager>, broker: Arc<dyn ReloadBroker>) -> Self {
        Self { pool, broker }
    }

    /// Subscribe, then process events until the stream ends.
    ///
    /// The subscription is in place when this returns.
    pub async fn spawn(self) -> Result<JoinHandle<()>> {
        let mut events = self.broker.subscribe().await?;
        info!("Reload consumer subscribed");

        let pool = self.pool;
        Ok(tokio::spawn(async move {
            // Last queued task per instance; each new event waits on it
            let mut tails: HashMap<String, JoinHandle<()>> = HashMap::new();
            while let Some(event) = events.next().await {
                tails.retain(|_, tail| !tail.is_finished());

                let instance_id = event.instance_id.clone();
                let previous = tails.remove(&instance_id);
                let pool = pool.clone();
                let tail = tokio::spawn(async move {
                    if let Some(previous) = previous {
                        let _ = previous.await;
                    }
                    apply(&pool, event).await;
                });
                tails.insert(instance_id, tail);
            }
            warn!("Reload stream ended");
        }))
    }
}

/// Apply one event. Failures are logged; the next event or request retries.
pub async fn apply(pool: &PoolManager, event: ReloadEvent) {
    let instance_id = event.instance_id.as_str();
    debug!(
        instance_id = %instance_id,
        action = %event.action,
        origin = %event.origin,
        config_hash = %event.config_hash,
        "Reload event received"
    );

    match event.action {
        ReloadAction::Load { tier } => {
            if let Err(e) = pool.load(instance_id, tier).await {
                warn!(instance_id = %instance_id, tier = %tier, error = %e, "Failed to apply load");
            }
        }
        ReloadAction::Reload => {
            let expected = Some(event.config_hash.as_str()).filter(|hash| !hash.is_empty());
            match pool.reload(instance_id, expected).await {
                Ok(ReloadOutcome::Rebuilt { previous, current, .. }) => {
                    info!(
                        instance_id = %instance_id,
                        previous = %previous,
                        current = %current,
                        "Applied reload"
                    );
                }
                Ok(outcome) => {
                    debug!(instance_id = %instance_id, outcome = ?outcome, "Reload needed no rebuild");
                }
                Err(e) => {
                    warn!(instance_id = %instance_id, error = %e, "Failed to apply reload");
                }
            }
        }
        ReloadAction::Unload => {
            pool.unload(instance_id).await;
        }
    }
}
