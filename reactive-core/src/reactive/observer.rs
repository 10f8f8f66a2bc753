//! The `Observer` core (§4.5, L5).
//!
//! An observer is a named, callback-driven subscription to a *set of keys*
//! spread across possibly many handles, rather than a subscription to one
//! handle's whole event stream. `run` mirrors the source crate's
//! `Effect::execute` — enter an [`ActiveObserver`] frame, invoke the caller's
//! closure, diff the newly recorded reads against the previous run's
//! `states`, and report which handles were gained/lost so the caller (the
//! registry) can keep each handle's reverse observer index in sync —
//! generalized from "which signals did this read" to "which `(handle, key)`
//! pairs did this read", since a handle here exposes many
//! independently-trackable keys rather than being itself the unit of
//! tracking. `on_change` is the separate notification fired when a tracked
//! key is touched (§4.5 `createObserver(onChange, onTrack?)`) — `run` is
//! what derivation code calls to *establish* dependencies, `on_change` is
//! what the broadcaster calls to *react* to them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::diagnostics;
use super::error::ReactiveError;
use super::id::{HandleId, ObserverId};
use super::tracking::ActiveObserver;
use super::value::PathKey;

/// A single trackable unit on a handle. Most reads track one specific key;
/// the two sentinels stand in for "any mutating method fired" on a sequence
/// or keyed-map/set (§3: `ARRAY_MUTATIONS` / `COLLECTION_MUTATIONS`), since a
/// structural mutation like `push` or `clear` doesn't target one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackedKey {
    Key(PathKey),
    ArrayMutations,
    CollectionMutations,
}

pub type ObserverCallback = Arc<dyn Fn() + Send + Sync>;
pub type TrackCallback = Arc<dyn Fn(HandleId, TrackedKey) + Send + Sync>;

/// A standing subscription to a set of `(handle, key)` pairs, re-derived on
/// every `run`.
pub struct Observer {
    id: ObserverId,
    name: Option<String>,
    on_change: ObserverCallback,
    on_track: Option<TrackCallback>,
    /// What this observer read on its most recent `run`, used both to decide
    /// who to notify and to compute the diff on the next run (§3 "Observer
    /// ... states: map handle -> set of tracked keys").
    states: RwLock<HashMap<HandleId, HashSet<TrackedKey>>>,
    destroyed: AtomicBool,
}

impl Observer {
    pub fn new(name: Option<String>, on_change: ObserverCallback) -> Arc<Self> {
        Arc::new(Self {
            id: ObserverId::new(),
            name,
            on_change,
            on_track: None,
            states: RwLock::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn with_on_track(
        name: Option<String>,
        on_change: ObserverCallback,
        on_track: TrackCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ObserverId::new(),
            name,
            on_change,
            on_track: Some(on_track),
            states: RwLock::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Run `f` inside this observer's active-tracking frame, recomputing
    /// which `(handle, key)` pairs it reads. Returns `f`'s result plus
    /// `(gained, lost)` — the handles this observer started/stopped tracking
    /// at least one key on.
    pub fn run<F, R>(self: &Arc<Self>, f: F) -> (R, HashSet<HandleId>, HashSet<HandleId>)
    where
        F: FnOnce() -> R,
    {
        if self.is_destroyed() {
            return (f(), HashSet::new(), HashSet::new());
        }

        let guard = ActiveObserver::enter(self.id);
        let result = f();
        let reads = ActiveObserver::reads();
        drop(guard);

        let mut next: HashMap<HandleId, HashSet<TrackedKey>> = HashMap::new();
        for (handle, key) in reads {
            if let Some(on_track) = &self.on_track {
                on_track(handle, key.clone());
            }
            next.entry(handle).or_default().insert(key);
        }

        let mut states = self.states.write();
        let before: HashSet<HandleId> = states.keys().copied().collect();
        let after: HashSet<HandleId> = next.keys().copied().collect();
        let gained = after.difference(&before).copied().collect();
        let lost = before.difference(&after).copied().collect();
        *states = next;
        (result, gained, lost)
    }

    /// Whether a change touching `handle` at `key` should wake this observer
    /// (§4.5: an observer re-runs if any key it read last run is touched).
    pub fn tracks(&self, handle: HandleId, key: &TrackedKey) -> bool {
        self.states
            .read()
            .get(&handle)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    pub fn tracked_handles(&self) -> Vec<HandleId> {
        self.states.read().keys().copied().collect()
    }

    /// Invoke `on_change`, isolating panics the way subscriber dispatch does
    /// (§7 "Propagation").
    pub fn notify(&self) {
        if self.is_destroyed() {
            return;
        }
        let callback = self.on_change.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback));
        if result.is_err() {
            diagnostics::capture(&ReactiveError::External {
                message: format!("observer {} onChange panicked", self.id),
            });
        }
    }

    pub fn destroy(&self) -> Vec<HandleId> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.states.write().drain().map(|(h, _)| h).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn run_tracks_reads_made_during_the_closure() {
        let handle = HandleId::new();
        let observer = Observer::new(Some("test".into()), Arc::new(|| {}));

        let (value, gained, lost) = observer.run(|| {
            ActiveObserver::record_read(handle, TrackedKey::Key(PathKey::from("a")));
            42
        });
        assert_eq!(value, 42);
        assert_eq!(gained, HashSet::from([handle]));
        assert!(lost.is_empty());
        assert!(observer.tracks(handle, &TrackedKey::Key(PathKey::from("a"))));
        assert!(!observer.tracks(handle, &TrackedKey::Key(PathKey::from("b"))));
    }

    #[test]
    fn second_run_diffs_against_the_first() {
        let handle_a = HandleId::new();
        let handle_b = HandleId::new();
        let observer = Observer::new(None, Arc::new(|| {}));

        let (_, gained1, lost1) = observer.run(|| {
            ActiveObserver::record_read(handle_a, TrackedKey::ArrayMutations);
        });
        assert_eq!(gained1, HashSet::from([handle_a]));
        assert!(lost1.is_empty());

        let (_, gained2, lost2) = observer.run(|| {
            ActiveObserver::record_read(handle_b, TrackedKey::CollectionMutations);
        });
        assert_eq!(gained2, HashSet::from([handle_b]));
        assert_eq!(lost2, HashSet::from([handle_a]));
    }

    #[test]
    fn notify_invokes_on_change_and_survives_a_panic() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let observer = Observer::new(
            None,
            Arc::new(move || {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                panic!("boom");
            }),
        );
        observer.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroy_reports_previously_tracked_handles_and_stops_tracking() {
        let handle = HandleId::new();
        let observer = Observer::new(None, Arc::new(|| {}));
        observer.run(|| {
            ActiveObserver::record_read(handle, TrackedKey::Key(PathKey::from("x")));
        });

        let cleared = observer.destroy();
        assert_eq!(cleared, vec![handle]);
        assert!(observer.is_destroyed());

        let (_, gained, lost) = observer.run(|| {
            ActiveObserver::record_read(handle, TrackedKey::Key(PathKey::from("x")));
        });
        assert!(gained.is_empty());
        assert!(lost.is_empty());
    }
}
