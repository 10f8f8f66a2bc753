//! The reactive handle facade and its metadata record (§3).
//!
//! `ReactiveHandle` itself is a thin, `Copy` reference — a pointer/index
//! into the registry (§9), never an owning reference to another handle's
//! internals. All the interesting state lives
//! in [`Metadata`], looked up by id in the
//! [`Registry`](super::registry::Registry).

use std::sync::Arc;

use super::change::StateChange;
use super::error::ReactiveError;
use super::id::{HandleId, ObserverId};
use super::schema::SchemaRef;
use super::value::{ShapeKind, Value};

/// The immutable configuration bundle every handle carries (§3 Metadata
/// record, `config` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleConfig {
    /// Writes fail with a `Violation` diagnostic and never touch state.
    pub immutable: bool,
    /// Nested linkable values are wrapped on demand and their `root`
    /// points back at this handle's root (§3 invariant 5).
    pub recursive: bool,
    /// Nested values resolve to a reactive handle lazily on first read
    /// rather than eagerly on construction (§4.3 "Keyed-map").
    pub deferred: bool,
    /// Reads register the active observer's tracked-key set (§4.3).
    pub observable: bool,
    /// The factory clones the input before wrapping rather than mutating it
    /// in place (§4.1 `raw` variant sets this to `false`).
    pub cloned: bool,
    /// Validation failures that have zero exception handlers are elevated
    /// to a terminal error rather than merely logged (§4.2 "Error path").
    pub strict: bool,
    /// Suppresses per-mutation trace-level logging (SPEC_FULL §B).
    pub production: bool,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            immutable: false,
            recursive: true,
            deferred: false,
            observable: true,
            cloned: true,
            strict: false,
            production: false,
        }
    }
}

impl HandleConfig {
    pub fn immutable() -> Self {
        Self {
            immutable: true,
            ..Self::default()
        }
    }

    pub fn raw() -> Self {
        Self {
            cloned: false,
            ..Self::default()
        }
    }

    pub fn flat() -> Self {
        Self {
            recursive: false,
            ..Self::default()
        }
    }
}

pub type ChangeCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;
pub type ExceptionCallback = Arc<dyn Fn(&ReactiveError) + Send + Sync>;
/// A comparator used by the `ordered` factory variant (§4.1, §4.3 "Ordered
/// variant") to re-sort a sequence after every structural mutation.
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> std::cmp::Ordering + Send + Sync>;

/// A token identifying one external subscription, returned by
/// [`Registry::subscribe`](super::registry::Registry::subscribe) so the
/// caller can unsubscribe later (§6 `subscribe(...) -> unsubscribeToken`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    pub handle: HandleId,
    pub id: u64,
}

#[derive(Clone)]
pub struct Subscriber {
    pub id: u64,
    pub callback: ChangeCallback,
    /// Internal subscribers are installed by the relational graph (§4.4) to
    /// relay child events upward; external ones are user-supplied. The
    /// broadcaster treats the two differently (§4.2).
    pub internal: bool,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("internal", &self.internal)
            .finish()
    }
}

/// One entry in the registry: everything the engine knows about a single
/// reactive handle (§3 "Metadata record").
pub struct Metadata {
    pub id: HandleId,
    pub shape: ShapeKind,
    pub data: Value,
    pub config: HandleConfig,
    pub root: Option<HandleId>,
    pub schema: Option<SchemaRef>,
    pub subscribers: Vec<Subscriber>,
    pub exception_handlers: Vec<(u64, ExceptionCallback)>,
    /// Observers currently tracking at least one key on this handle. The
    /// tracked-key sets themselves live on the `Observer` (§3: "Observer ...
    /// states: map handle -> set of tracked keys"); this is the reverse
    /// index used to notify them and to clean up on destroy.
    pub observers: std::collections::HashSet<ObserverId>,
    pub destroyed: bool,
    /// Set only for handles created via the `ordered` factory variant; the
    /// sequence is re-sorted with this after every structural mutation.
    pub comparator: Option<Comparator>,
    next_subscriber_id: u64,
    next_handler_id: u64,
}

impl Metadata {
    pub fn new(id: HandleId, shape: ShapeKind, data: Value, config: HandleConfig) -> Self {
        Self {
            id,
            shape,
            data,
            config,
            root: None,
            schema: None,
            subscribers: Vec::new(),
            exception_handlers: Vec::new(),
            observers: std::collections::HashSet::new(),
            destroyed: false,
            comparator: None,
            next_subscriber_id: 1,
            next_handler_id: 1,
        }
    }

    pub fn root_or_self(&self) -> HandleId {
        self.root.unwrap_or(self.id)
    }

    /// Add a subscriber, enforcing §3 invariant 2 (at-most-one subscription
    /// per callback identity). Returns `(subscriber_id, already_present)`.
    pub fn add_subscriber(&mut self, callback: ChangeCallback, internal: bool) -> (u64, bool) {
        let callback_ptr = Arc::as_ptr(&callback) as *const () as usize;
        for sub in &self.subscribers {
            if Arc::as_ptr(&sub.callback) as *const () as usize == callback_ptr {
                return (sub.id, true);
            }
        }
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.push(Subscriber {
            id,
            callback,
            internal,
        });
        (id, false)
    }

    pub fn remove_subscriber(&mut self, id: u64) {
        self.subscribers.retain(|s| s.id != id);
    }

    pub fn add_exception_handler(&mut self, callback: ExceptionCallback) -> u64 {
        let id = self.next_handler_id;
        self.next_handler_id += 1;
        self.exception_handlers.push((id, callback));
        id
    }

    pub fn remove_exception_handler(&mut self, id: u64) {
        self.exception_handlers.retain(|(hid, _)| *hid != id);
    }

    pub fn has_external_subscribers(&self) -> bool {
        self.subscribers.iter().any(|s| !s.internal)
    }
}

/// The opaque, `Copy` facade returned to client code. All operations are
/// dispatched through [`Registry`](super::registry::Registry) /
/// [`interceptor`](super::interceptor) methods that look the id up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactiveHandle {
    pub id: HandleId,
    pub shape: ShapeKind,
}

impl ReactiveHandle {
    pub fn new(id: HandleId, shape: ShapeKind) -> Self {
        Self { id, shape }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_subscriber_identity_is_idempotent() {
        let mut meta = Metadata::new(
            HandleId::new(),
            ShapeKind::Record,
            Value::Null,
            HandleConfig::default(),
        );
        let cb: ChangeCallback = Arc::new(|_| {});
        let (id1, dup1) = meta.add_subscriber(cb.clone(), false);
        let (id2, dup2) = meta.add_subscriber(cb, false);
        assert_eq!(id1, id2);
        assert!(!dup1);
        assert!(dup2);
        assert_eq!(meta.subscribers.len(), 1);
    }

    #[test]
    fn external_subscriber_detection() {
        let mut meta = Metadata::new(
            HandleId::new(),
            ShapeKind::Record,
            Value::Null,
            HandleConfig::default(),
        );
        assert!(!meta.has_external_subscribers());
        meta.add_subscriber(Arc::new(|_| {}), true);
        assert!(!meta.has_external_subscribers());
        meta.add_subscriber(Arc::new(|_| {}), false);
        assert!(meta.has_external_subscribers());
    }
}
