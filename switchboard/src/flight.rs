//! Per-key single flight.
//!
//! Concurrent callers for the same key collapse into one execution; the
//! leader's result is broadcast to everyone who joined while it ran. Keys are
//! independent, so a slow flight never blocks another key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use tokio::sync::broadcast;
use tracing::debug;

/// Deduplicates concurrent work by key.
pub struct SingleFlight<T: Clone + Send + 'static> {
    in_flight: DashMap<String, broadcast::Sender<T>>,
}

impl<T: Clone + Send + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Run `work` for `key` unless a flight is already running, in which case
    /// wait for and return its result.
    ///
    /// If the leader is cancelled before finishing, one waiter takes over.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let waiter = match self.in_flight.entry(key.to_string()) {
                Entry::Occupied(flight) => Some(flight.get().subscribe()),
                Entry::Vacant(slot) => {
                    let (sender, _) = broadcast::channel(1);
                    slot.insert(sender);
                    None
                }
            };

            match waiter {
                Some(mut receiver) => match receiver.recv().await {
                    Ok(result) => return result,
                    // Leader dropped without a result; race to lead again
                    Err(_) => continue,
                },
                None => break,
            }
        }

        let mut guard = FlightGuard {
            in_flight: &self.in_flight,
            key,
            armed: true,
        };

        let result = work().await;

        guard.armed = false;
        if let Some((_, sender)) = self.in_flight.remove(key) {
            let waiters = sender.receiver_count();
            if waiters > 0 {
                debug!(key = %key, waiters, "Single flight shared result");
            }
            let _ = sender.send(result.clone());
        }

        result
    }

    /// Number of keys with a flight in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Clears the leader's slot if its future is dropped mid-flight.
struct FlightGuard<'a, T> {
    in_flight: &'a DashMap<String, broadcast::Sender<T>>,
    key: &'a str,
    armed: bool,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.in_flight.remove(self.key);
        }
    }
}
