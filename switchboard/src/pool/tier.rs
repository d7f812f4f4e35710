//! Per-instance tier state.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use super::lease::LiveInstance;
use crate::instance::{OrchestratorInstance, Tier};

/// Where an instance currently lives in this process.
pub enum TierState {
    /// Known, nothing cached
    Cold,
    /// Configuration cached
    Warm {
        instance: Arc<OrchestratorInstance>,
        loaded_at: Instant,
    },
    /// Executor built and pinned to its shared resources
    Hot {
        instance: Arc<OrchestratorInstance>,
        live: Arc<LiveInstance>,
        promoted_at: Instant,
    },
}

impl TierState {
    pub fn warm(instance: Arc<OrchestratorInstance>) -> Self {
        TierState::Warm {
            instance,
            loaded_at: Instant::now(),
        }
    }

    pub fn hot(instance: Arc<OrchestratorInstance>, live: Arc<LiveInstance>) -> Self {
        TierState::Hot {
            instance,
            live,
            promoted_at: Instant::now(),
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            TierState::Cold => Tier::Cold,
            TierState::Warm { .. } => Tier::Warm,
            TierState::Hot { .. } => Tier::Hot,
        }
    }

    /// Cached configuration, if any.
    pub fn instance(&self) -> Option<&Arc<OrchestratorInstance>> {
        match self {
            TierState::Cold => None,
            TierState::Warm { instance, .. } | TierState::Hot { instance, .. } => Some(instance),
        }
    }

    pub fn live(&self) -> Option<&Arc<LiveInstance>> {
        match self {
            TierState::Hot { live, .. } => Some(live),
            _ => None,
        }
    }

    /// Hash of the local copy: the live executor's when hot.
    pub fn config_hash(&self) -> Option<&str> {
        match self {
            TierState::Cold => None,
            TierState::Warm { instance, .. } => Some(&instance.config_hash),
            TierState::Hot { live, .. } => Some(live.config_hash()),
        }
    }

    /// Time spent in the current tier.
    pub fn since(&self) -> Option<Duration> {
        match self {
            TierState::Cold => None,
            TierState::Warm { loaded_at, .. } => Some(loaded_at.elapsed()),
            TierState::Hot { promoted_at, .. } => Some(promoted_at.elapsed()),
        }
    }

    /// Demote to warm, returning the executor that was live.
    pub fn demote(&mut self) -> Option<Arc<LiveInstance>> {
        let previous = std::mem::replace(self, TierState::Cold);
        match previous {
            TierState::Hot { instance, live, .. } => {
                *self = TierState::warm(instance);
                Some(live)
            }
            other => {
                *self = other;
                None
            }
        }
    }
}

/// One instance's slot in the pool.
pub struct PoolEntry {
    pub state: RwLock<TierState>,
    /// Serializes tier transitions for this instance
    pub transition: Mutex<()>,
    touch_seq: AtomicU64,
    last_access_ms: AtomicI64,
    access_dirty: AtomicBool,
}

impl PoolEntry {
    pub fn new(state: TierState, seq: u64) -> Self {
        Self {
            state: RwLock::new(state),
            transition: Mutex::new(()),
            touch_seq: AtomicU64::new(seq),
            last_access_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            access_dirty: AtomicBool::new(false),
        }
    }

    /// Mark the entry as just used.
    pub fn touch(&self, seq: u64) {
        self.touch_seq.store(seq, Ordering::SeqCst);
        self.last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.access_dirty.store(true, Ordering::SeqCst);
    }

    /// Recency rank; larger is more recent.
    pub fn touch_seq(&self) -> u64 {
        self.touch_seq.load(Ordering::SeqCst)
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_access_ms.load(Ordering::SeqCst))
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn idle_for(&self) -> Duration {
        let idle_ms = Utc::now().timestamp_millis() - self.last_access_ms.load(Ordering::SeqCst);
        Duration::from_millis(idle_ms.max(0) as u64)
    }

    /// Whether an access happened since the last call.
    pub fn take_dirty(&self) -> bool {
        self.access_dirty.swap(false, Ordering::SeqCst)
    }

    /// Re-queue an access whose flush failed.
    pub fn mark_dirty(&self) {
        self.access_dirty.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demote_only_affects_hot() {
        let instance = Arc::new(OrchestratorInstance::new("t1", "bot"));
        let mut state = TierState::warm(instance);
        assert!(state.demote().is_none());
        assert_eq!(state.tier(), Tier::Warm);

        let mut cold = TierState::Cold;
        assert!(cold.demote().is_none());
        assert_eq!(cold.tier(), Tier::Cold);
        assert!(cold.config_hash().is_none());
    }

    #[test]
    fn test_touch_marks_dirty_once() {
        let entry = PoolEntry::new(TierState::Cold, 1);
        assert!(!entry.take_dirty());

        entry.touch(7);
        assert_eq!(entry.touch_seq(), 7);
        assert!(entry.take_dirty());
        assert!(!entry.take_dirty());
        assert!(entry.idle_for() < Duration::from_secs(5));
    }
}
