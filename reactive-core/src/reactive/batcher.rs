//! Debounce utility (§4.7 "Debounced capture", §9 "Batching").
//!
//! Both the history recorder and the `deferred` handle config need the same
//! primitive: coalesce a burst of same-key events arriving within a short
//! window into a single flush. This crate carries no async runtime, so the
//! debounce is expressed synchronously: a caller-driven "tick" rather than a
//! timer task (see DESIGN.md for why). A host that wants wall-clock
//! debouncing drives `Debouncer::tick` from its own event loop or a
//! `std::thread::sleep` poll; the crate itself stays executor-agnostic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A single pending (mergeable) entry, identified by an opaque key supplied
/// by the caller (e.g. a handle id, or a handle+path tuple encoded as a
/// string).
struct Pending<T> {
    value: T,
    first_seen: Instant,
    last_seen: Instant,
}

/// Coalesces same-key updates arriving within `window` of each other.
/// `merge` combines a new value into a pending one (§3 "History merge":
/// same-keys `set` events collapse, keeping the earliest `prev` and the
/// latest `value`).
pub struct Debouncer<K, T> {
    window: Duration,
    pending: Mutex<HashMap<K, Pending<T>>>,
}

impl<K, T> Debouncer<K, T>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record `value` under `key`, merging with whatever is already pending
    /// via `merge`. Returns immediately; nothing flushes until `tick`.
    pub fn push(&self, key: K, value: T, merge: impl FnOnce(T, T) -> T) {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        match pending.remove(&key) {
            Some(existing) => {
                pending.insert(
                    key,
                    Pending {
                        value: merge(existing.value, value),
                        first_seen: existing.first_seen,
                        last_seen: now,
                    },
                );
            }
            None => {
                pending.insert(
                    key,
                    Pending {
                        value,
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Drain every entry whose debounce window has elapsed since its last
    /// update, in the order they were first seen.
    pub fn tick(&self) -> Vec<(K, T)> {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let ready: Vec<K> = pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) >= self.window)
            .map(|(k, _)| k.clone())
            .collect();
        let mut out: Vec<(K, Pending<T>)> = ready
            .into_iter()
            .filter_map(|k| pending.remove(&k).map(|p| (k, p)))
            .collect();
        out.sort_by_key(|(_, p)| p.first_seen);
        out.into_iter().map(|(k, p)| (k, p.value)).collect()
    }

    /// Force-flush every pending entry regardless of window, e.g. on
    /// explicit `history.flush()` or handle destroy.
    pub fn flush_all(&self) -> Vec<(K, T)> {
        let mut pending = self.pending.lock();
        let mut out: Vec<(K, Pending<T>)> = pending.drain().collect();
        out.sort_by_key(|(_, p)| p.first_seen);
        out.into_iter().map(|(k, p)| (k, p.value)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
