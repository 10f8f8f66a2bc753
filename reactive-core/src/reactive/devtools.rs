//! Dev-tool protocol (§6).
//!
//! An optional receiver that mirrors every interesting thing the engine does
//! — construction, reads, writes, method calls, batch operations,
//! subscription and link bookkeeping, observer tracking, destruction. Hosts
//! plug in a concrete [`DevToolHook`] to build inspector-style tooling;
//! [`history::undoable`](super::history::undoable) plugs in a temporary one
//! to record an operation's effects without a long-lived history recorder.
//!
//! No concrete hook implementation belongs in this crate (that's up to a
//! host), so besides the no-op default there is only a `RecordingHook` used
//! by tests and by `undoable`.

use std::sync::Arc;

use parking_lot::RwLock;

use super::change::StateChange;
use super::id::{HandleId, ObserverId};
use super::value::{PathKey, Value};

#[derive(Debug, Clone)]
pub enum DevToolEvent {
    Init { handle: HandleId },
    Get { handle: HandleId, key: Option<PathKey> },
    Set { handle: HandleId, key: PathKey, value: Value },
    Delete { handle: HandleId, key: PathKey },
    Call { handle: HandleId, method: String, args: Vec<Value> },
    Assign { handle: HandleId, patch: Vec<(PathKey, Value)> },
    Remove { handle: HandleId, keys: Vec<PathKey> },
    Clear { handle: HandleId },
    Subscribe { handle: HandleId },
    Unsubscribe { handle: HandleId },
    Link { parent: HandleId, key: PathKey, child: HandleId },
    Unlink { parent: HandleId, key: PathKey, child: HandleId },
    Track { observer: ObserverId, handle: HandleId, key: PathKey },
    Untrack { observer: ObserverId, handle: HandleId },
    Destroy { handle: HandleId },
    Change { change: StateChange },
}

/// Implemented by host-provided inspectors.
pub trait DevToolHook: Send + Sync {
    fn on_event(&self, event: &DevToolEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevToolToken(u64);

struct Entry {
    token: DevToolToken,
    hook: Arc<dyn DevToolHook>,
}

/// Process-wide registry of dev-tool hooks. Dispatch isolates each hook with
/// `catch_unwind`: a panicking inspector never prevents the mutation it is
/// observing from completing, matching §7's external-callback propagation
/// rule.
pub struct DevToolRegistry {
    hooks: RwLock<Vec<Entry>>,
    next_token: std::sync::atomic::AtomicU64,
}

impl DevToolRegistry {
    pub const fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            next_token: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn register(&self, hook: Arc<dyn DevToolHook>) -> DevToolToken {
        let token = DevToolToken(
            self.next_token
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        self.hooks.write().push(Entry { token, hook });
        token
    }

    pub fn unregister(&self, token: DevToolToken) {
        self.hooks.write().retain(|e| e.token != token);
    }

    pub fn notify(&self, event: DevToolEvent) {
        let hooks: Vec<_> = self.hooks.read().iter().map(|e| e.hook.clone()).collect();
        for hook in hooks {
            let event = event.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                hook.on_event(&event);
            }));
            if result.is_err() {
                tracing::error!("dev-tool hook panicked while handling {:?}", event);
            }
        }
    }
}

impl Default for DevToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A hook that records every event it sees, in order. Used by tests and by
/// [`history::undoable`](super::history::undoable).
#[derive(Default)]
pub struct RecordingHook {
    events: RwLock<Vec<DevToolEvent>>,
}

impl RecordingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<DevToolEvent> {
        std::mem::take(&mut self.events.write())
    }
}

impl DevToolHook for RecordingHook {
    fn on_event(&self, event: &DevToolEvent) {
        self.events.write().push(event.clone());
    }
}
