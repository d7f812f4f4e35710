//! Generic reference-counted registry.
//!
//! Entries are created at most once per key (single flight), counted per
//! live [`SharedHandle`], and kept for a grace period after the last handle
//! drops so a rebuild moments later reuses them. A reaper removes entries
//! whose grace period has elapsed.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::flight::SingleFlight;
use crate::types::{Result, SwitchboardError};

struct Slot<V: ?Sized> {
    value: Arc<V>,
    refs: usize,
    /// Set while `refs == 0`
    released_at: Option<Instant>,
}

struct Inner<V: ?Sized> {
    kind: &'static str,
    grace: Duration,
    slots: DashMap<String, Slot<V>>,
    flights: SingleFlight<Result<()>>,
}

impl<V: ?Sized> Inner<V> {
    fn release(&self, key: &str) {
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.refs > 0 => {
                slot.refs -= 1;
                if slot.refs == 0 {
                    slot.released_at = Some(Instant::now());
                    debug!(kind = self.kind, key = %key, "Shared resource idle");
                }
            }
            Some(_) => warn!(kind = self.kind, key = %key, "Release of unreferenced resource"),
            None => warn!(kind = self.kind, key = %key, "Release of unknown resource"),
        }
    }
}

/// Counters for one registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub kind: String,
    pub entries: usize,
    /// Sum of live handles over all entries
    pub references: usize,
    /// Entries waiting out their grace period
    pub idle: usize,
}

/// Reference-counted cache of shared values keyed by content.
pub struct SharedRegistry<V: ?Sized + Send + Sync + 'static> {
    inner: Arc<Inner<V>>,
}

impl<V: ?Sized + Send + Sync + 'static> Clone for SharedRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: ?Sized + Send + Sync + 'static> SharedRegistry<V> {
    pub fn new(kind: &'static str, grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                grace,
                slots: DashMap::new(),
                flights: SingleFlight::new(),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    /// Return a handle for `key`, running `factory` once if it is absent.
    pub async fn acquire<F, Fut>(&self, key: &str, factory: F) -> Result<SharedHandle<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<V>>>,
    {
        if let Some(handle) = self.try_acquire(key) {
            return Ok(handle);
        }

        let inner = &self.inner;
        inner
            .flights
            .run(key, || async move {
                if inner.slots.contains_key(key) {
                    return Ok::<(), SwitchboardError>(());
                }
                let started = Instant::now();
                let value = factory().await?;
                inner.slots.insert(
                    key.to_string(),
                    Slot {
                        value,
                        refs: 0,
                        released_at: Some(Instant::now()),
                    },
                );
                info!(
                    kind = inner.kind,
                    key = %key,
                    build_ms = started.elapsed().as_millis() as u64,
                    "Shared resource created"
                );
                Ok(())
            })
            .await?;

        self.try_acquire(key).ok_or_else(|| SwitchboardError::ResourceAcquisition {
            kind: self.inner.kind.to_string(),
            key: key.to_string(),
            reason: "reaped before it could be referenced".to_string(),
        })
    }

    fn try_acquire(&self, key: &str) -> Option<SharedHandle<V>> {
        let mut slot = self.inner.slots.get_mut(key)?;
        slot.refs += 1;
        slot.released_at = None;
        Some(SharedHandle {
            key: key.to_string(),
            value: slot.value.clone(),
            registry: self.inner.clone(),
        })
    }

    /// Current reference count for `key`.
    pub fn refcount(&self, key: &str) -> Option<usize> {
        self.inner.slots.get(key).map(|slot| slot.refs)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.slots.contains_key(key)
    }

    /// Drop entries idle for longer than the grace period.
    pub fn reap(&self) -> usize {
        let grace = self.inner.grace;
        let kind = self.inner.kind;
        let before = self.inner.slots.len();

        self.inner.slots.retain(|key, slot| {
            let expired = slot.refs == 0
                && slot
                    .released_at
                    .map(|at| at.elapsed() >= grace)
                    .unwrap_or(false);
            if expired {
                debug!(kind, key = %key, "Reaping shared resource");
            }
            !expired
        });

        before.saturating_sub(self.inner.slots.len())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            kind: self.inner.kind.to_string(),
            ..Default::default()
        };
        for slot in self.inner.slots.iter() {
            stats.entries += 1;
            stats.references += slot.refs;
            if slot.refs == 0 {
                stats.idle += 1;
            }
        }
        stats
    }
}

/// One live reference to a shared value; released on drop.
pub struct SharedHandle<V: ?Sized + Send + Sync + 'static> {
    key: String,
    value: Arc<V>,
    registry: Arc<Inner<V>>,
}

impl<V: ?Sized + Send + Sync + 'static> SharedHandle<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// A clone of the shared value.
    pub fn value(&self) -> Arc<V> {
        self.value.clone()
    }
}

impl<V: ?Sized + Send + Sync + 'static> Deref for SharedHandle<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<V: ?Sized + Send + Sync + 'static> Drop for SharedHandle<V> {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

impl<V: ?Sized + Send + Sync + 'static> fmt::Debug for SharedHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("kind", &self.registry.kind)
            .field("key", &self.key)
            .finish()
    }
}
