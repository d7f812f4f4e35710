//! Built executors and the leases that pin them.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use switchboard_agent::GraphExecutor;

use crate::resources::{BundleHandle, ModelHandle, TemplateHandle};

/// Shared-resource references held by one built executor.
pub struct ResourceSet {
    /// One handle per distinct model key
    pub models: HashMap<String, ModelHandle>,
    pub template: TemplateHandle,
    pub bundles: Vec<BundleHandle>,
}

impl ResourceSet {
    /// Number of registry references this set holds.
    pub fn references(&self) -> usize {
        self.models.len() + 1 + self.bundles.iter().filter(|b| b.is_shared()).count()
    }
}

/// A built executor plus the resources it pins.
pub struct LiveInstance {
    instance_id: String,
    config_hash: String,
    executor: Arc<GraphExecutor>,
    resources: Mutex<Option<ResourceSet>>,
    leases: AtomicUsize,
    idle: Notify,
    built_at: Instant,
}

impl LiveInstance {
    pub fn new(
        instance_id: impl Into<String>,
        config_hash: impl Into<String>,
        executor: GraphExecutor,
        resources: ResourceSet,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            config_hash: config_hash.into(),
            executor: Arc::new(executor),
            resources: Mutex::new(Some(resources)),
            leases: AtomicUsize::new(0),
            idle: Notify::new(),
            built_at: Instant::now(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn executor(&self) -> &Arc<GraphExecutor> {
        &self.executor
    }

    /// Turns currently running on this executor.
    pub fn leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// Take a lease; `released` is notified when it ends.
    pub(crate) fn lease(self: &Arc<Self>, released: Arc<Notify>) -> ExecutorHandle {
        self.leases.fetch_add(1, Ordering::SeqCst);
        ExecutorHandle {
            live: self.clone(),
            released,
        }
    }

    /// Wait until no lease is held, up to `timeout`. Returns whether it drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.leases() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.leases() == 0;
            }
        }
    }

    /// Drop every shared-resource reference. Idempotent.
    pub async fn release_resources(&self) -> usize {
        match self.resources.lock().await.take() {
            Some(resources) => {
                let references = resources.references();
                drop(resources);
                debug!(
                    instance_id = %self.instance_id,
                    config_hash = %self.config_hash,
                    references,
                    "Released shared resources"
                );
                references
            }
            None => 0,
        }
    }

    pub async fn holds_resources(&self) -> bool {
        self.resources.lock().await.is_some()
    }
}

impl fmt::Debug for LiveInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveInstance")
            .field("instance_id", &self.instance_id)
            .field("config_hash", &self.config_hash)
            .field("leases", &self.leases())
            .finish()
    }
}

/// A lease on a hot executor. The executor is not evicted or released while
/// any handle is alive; dropping the handle ends the lease.
pub struct ExecutorHandle {
    live: Arc<LiveInstance>,
    released: Arc<Notify>,
}

impl ExecutorHandle {
    pub fn instance_id(&self) -> &str {
        self.live.instance_id()
    }

    pub fn config_hash(&self) -> &str {
        self.live.config_hash()
    }

    /// Owned executor reference, for running a turn on another task.
    pub fn executor(&self) -> Arc<GraphExecutor> {
        self.live.executor.clone()
    }
}

impl Deref for ExecutorHandle {
    type Target = GraphExecutor;

    fn deref(&self) -> &GraphExecutor {
        &self.live.executor
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        if self.live.leases.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.live.idle.notify_waiters();
        }
        self.released.notify_waiters();
    }
}

impl fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("instance_id", &self.live.instance_id)
            .field("config_hash", &self.live.config_hash)
            .finish()
    }
}
