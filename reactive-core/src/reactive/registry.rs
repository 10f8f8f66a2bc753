//! Registry & Handle Factory (§4.1, L1).
//!
//! The registry is the single process-scoped table mapping [`HandleId`]s to
//! [`Metadata`] (§3 invariant 1: "for any reactive handle H, `registry[H]`
//! yields `H.underlying`"). It owns the factory (`wrap` and its variants),
//! the companion inspection/mutation helpers (§4.1), and the glue between
//! the interceptor layer (§4.3, `src/reactive/interceptor/`), the
//! relational graph (§4.4, [`links`](super::links)) and the broadcaster
//! (§4.2, [`broadcaster`](super::broadcaster)).
//!
//! Linking is deliberately eager rather than lazy (recorded in DESIGN.md):
//! rather than installing the parent→child relay subscription lazily on
//! first external subscribe, this implementation links at construction and
//! at every write that introduces a new child. The observable behaviour is
//! identical either way, and always-linking removes an entire class of "did
//! we remember to backfill links when the first subscriber arrives"
//! bookkeeping.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;

use super::broadcaster;
use super::change::{ChangeType, StateChange};
use super::diagnostics;
use super::error::{ReactiveError, Result};
use super::handle::{
    ChangeCallback, Comparator, ExceptionCallback, HandleConfig, Metadata, ReactiveHandle,
    SubscriptionToken,
};
use super::id::HandleId;
use super::links::LinkGraph;
use super::observer::{Observer, TrackedKey};
use super::schema::SchemaRef;
use super::tracking::ActiveObserver;
use super::value::{Key, PathKey, ShapeKind, Value};

/// Outcome of [`Registry::wrap`] (§4.1): linkable input becomes a handle;
/// anything else is handed back untouched. Encoding this as an enum rather
/// than panicking or silently coercing is what §4.1's "never panics on
/// non-linkable input; returns the input verbatim" looks like in a typed
/// API.
#[derive(Debug, Clone)]
pub enum WrapOutcome {
    Wrapped(ReactiveHandle),
    Unchanged(Value),
}

impl WrapOutcome {
    pub fn handle(&self) -> Option<ReactiveHandle> {
        match self {
            WrapOutcome::Wrapped(h) => Some(*h),
            WrapOutcome::Unchanged(_) => None,
        }
    }
}

pub struct Registry {
    pub(crate) slots: DashMap<HandleId, Metadata>,
    links: LinkGraph,
    devtools: super::devtools::DevToolRegistry,
    relay_subs: DashMap<(HandleId, HandleId), u64>,
    observers: DashMap<super::id::ObserverId, std::sync::Weak<Observer>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry (§5 "Shared resource policy": process-scoped,
/// reentrant on one thread, not reentrancy-safe across threads without an
/// external mutex — `DashMap`'s per-shard locking gives us that much for
/// free, the same tradeoff this codebase already makes for its other
/// concurrent tables).
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

thread_local! {
    static IN_FLIGHT: std::cell::RefCell<HashSet<HandleId>> = std::cell::RefCell::new(HashSet::new());
}

impl Registry {
    fn new() -> Self {
        Self {
            slots: DashMap::new(),
            links: LinkGraph::new(),
            devtools: super::devtools::DevToolRegistry::new(),
            relay_subs: DashMap::new(),
            observers: DashMap::new(),
        }
    }

    pub fn devtools(&self) -> &super::devtools::DevToolRegistry {
        &self.devtools
    }

    pub fn links(&self) -> &LinkGraph {
        &self.links
    }

    pub fn shape_of(&self, id: HandleId) -> Option<ShapeKind> {
        self.slots.get(&id).map(|m| m.shape)
    }

    pub fn is_destroyed(&self, id: HandleId) -> bool {
        self.slots.get(&id).map(|m| m.destroyed).unwrap_or(true)
    }

    pub fn config_of(&self, id: HandleId) -> Option<HandleConfig> {
        self.slots.get(&id).map(|m| m.config)
    }

    fn root_or_self(&self, id: HandleId) -> HandleId {
        self.slots.get(&id).map(|m| m.root_or_self()).unwrap_or(id)
    }

    fn has_external_subscribers(&self, id: HandleId) -> bool {
        self.slots
            .get(&id)
            .map(|m| m.has_external_subscribers())
            .unwrap_or(false)
    }

    // ---------------------------------------------------------------
    // Factory (§4.1)
    // ---------------------------------------------------------------

    pub fn wrap(&'static self, value: Value, config: HandleConfig) -> WrapOutcome {
        if let Value::Handle(id) = &value {
            if let Some(shape) = self.shape_of(*id) {
                return WrapOutcome::Wrapped(ReactiveHandle::new(*id, shape));
            }
        }
        if !value.is_linkable() {
            diagnostics::capture(&ReactiveError::Initialization {
                message: "wrap called on a non-linkable value".into(),
            });
            return WrapOutcome::Unchanged(value);
        }
        if let Some(existing) = self.find(&value) {
            return WrapOutcome::Wrapped(existing);
        }

        let shape = value.shape_kind();
        let id = HandleId::new();
        let data = if config.recursive && !config.deferred {
            self.materialize(value, config, id, id)
        } else {
            value
        };
        let meta = Metadata::new(id, shape, data, config);
        if !config.production {
            tracing::trace!(handle = %id, shape = ?shape, "wrap");
        }
        self.slots.insert(id, meta);
        self.devtools
            .notify(super::devtools::DevToolEvent::Init { handle: id });
        WrapOutcome::Wrapped(ReactiveHandle::new(id, shape))
    }

    pub fn wrap_model(
        &'static self,
        schema: SchemaRef,
        value: Value,
        config: HandleConfig,
    ) -> WrapOutcome {
        let outcome = self.wrap(value, config);
        if let WrapOutcome::Wrapped(handle) = &outcome {
            if let Some(mut meta) = self.slots.get_mut(&handle.id) {
                meta.schema = Some(schema);
            }
        }
        outcome
    }

    pub fn wrap_ordered(
        &'static self,
        items: Vec<Value>,
        config: HandleConfig,
        comparator: Comparator,
    ) -> WrapOutcome {
        let mut items = items;
        items.sort_by(|a, b| comparator(a, b));
        let outcome = self.wrap(Value::Sequence(items), config);
        if let WrapOutcome::Wrapped(handle) = &outcome {
            if let Some(mut meta) = self.slots.get_mut(&handle.id) {
                meta.comparator = Some(comparator);
            }
        }
        outcome
    }

    fn materialize(
        &'static self,
        value: Value,
        config: HandleConfig,
        root_id: HandleId,
        owner_id: HandleId,
    ) -> Value {
        match value {
            Value::Record(map) => {
                let mut out = IndexMap::new();
                for (k, v) in map {
                    if v.is_linkable() {
                        let child_id = self.register_child(v, config, root_id);
                        self.link_child(owner_id, Key::Str(k.clone()), child_id);
                        out.insert(k, Value::Handle(child_id));
                    } else {
                        out.insert(k, v);
                    }
                }
                Value::Record(out)
            }
            Value::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, v) in items.into_iter().enumerate() {
                    if v.is_linkable() {
                        let child_id = self.register_child(v, config, root_id);
                        self.link_child(owner_id, Key::Int(i as i64), child_id);
                        out.push(Value::Handle(child_id));
                    } else {
                        out.push(v);
                    }
                }
                Value::Sequence(out)
            }
            Value::Map(map) => {
                let mut out = IndexMap::new();
                for (k, v) in map {
                    if v.is_linkable() {
                        let child_id = self.register_child(v, config, root_id);
                        self.link_child(owner_id, k.clone(), child_id);
                        out.insert(k, Value::Handle(child_id));
                    } else {
                        out.insert(k, v);
                    }
                }
                Value::Map(out)
            }
            other => other,
        }
    }

    fn register_child(&'static self, value: Value, config: HandleConfig, root_id: HandleId) -> HandleId {
        let shape = value.shape_kind();
        let child_id = HandleId::new();
        let data = self.materialize(value, config, root_id, child_id);
        let mut meta = Metadata::new(child_id, shape, data, config);
        meta.root = Some(root_id);
        self.slots.insert(child_id, meta);
        self.devtools
            .notify(super::devtools::DevToolEvent::Init { handle: child_id });
        child_id
    }

    /// Prepare a single incoming value for storage in a slot: resolve an
    /// already-wrapped value to its existing handle (identity preserved, per
    /// §4.3 "Writing a value already reactive"), or register a brand-new
    /// child if it's a fresh linkable value under a recursive config.
    fn prepare_incoming(&'static self, value: Value, config: HandleConfig, root_id: HandleId) -> Value {
        match value {
            Value::Handle(_) => value,
            other if other.is_linkable() && config.recursive && !config.deferred => {
                Value::Handle(self.register_child(other, config, root_id))
            }
            other => other,
        }
    }

    // ---------------------------------------------------------------
    // Linking (§4.4, L4)
    // ---------------------------------------------------------------

    pub(crate) fn link_child(&'static self, parent_id: HandleId, key: PathKey, child_id: HandleId) {
        let is_new_edge = !self
            .links
            .children_of(parent_id)
            .iter()
            .any(|(_, c)| *c == child_id);
        self.links.link(parent_id, key.clone(), child_id);
        if is_new_edge {
            let devtools_key = key.clone();
            let relay_key = key;
            let cb: ChangeCallback = Arc::new(move |change: &StateChange| {
                if change.emitter == parent_id {
                    return;
                }
                let lifted = change.clone().lifted(relay_key.clone(), parent_id);
                let _ = self.emit_change(parent_id, lifted);
            });
            if let Some(mut meta) = self.slots.get_mut(&child_id) {
                let (sub_id, _) = meta.add_subscriber(cb, true);
                self.relay_subs.insert((parent_id, child_id), sub_id);
                self.devtools.notify(super::devtools::DevToolEvent::Link {
                    parent: parent_id,
                    key: devtools_key,
                    child: child_id,
                });
            }
        }
    }

    pub(crate) fn unlink_child(&'static self, parent_id: HandleId, key: &PathKey) {
        if let Some(child_id) = self.links.unlink(parent_id, key) {
            let still_linked = self.links.parents_of(child_id).contains(&parent_id);
            if !still_linked {
                if let Some((_, sub_id)) = self.relay_subs.remove(&(parent_id, child_id)) {
                    if let Some(mut meta) = self.slots.get_mut(&child_id) {
                        meta.remove_subscriber(sub_id);
                    }
                }
                self.devtools.notify(super::devtools::DevToolEvent::Unlink {
                    parent: parent_id,
                    key: key.clone(),
                    child: child_id,
                });
            }
            if !self.links.has_parents(child_id) && !self.has_external_subscribers(child_id) {
                self.destroy_internal(child_id);
            }
        }
    }

    fn destroy_internal(&'static self, id: HandleId) {
        let children = self.links.unlink_all(id);
        for child in children {
            self.relay_subs.remove(&(id, child));
            if !self.links.has_parents(child) && !self.has_external_subscribers(child) {
                self.destroy_internal(child);
            }
        }
        if let Some(mut meta) = self.slots.get_mut(&id) {
            meta.destroyed = true;
        }
        self.devtools
            .notify(super::devtools::DevToolEvent::Destroy { handle: id });
    }

    // ---------------------------------------------------------------
    // Dispatch — broadcaster + observer notification (§4.2, §4.5, §5)
    // ---------------------------------------------------------------

    /// Apply the broadcast side-effects of a freshly-produced `StateChange`:
    /// fan out to subscribers (relaying further up the relational graph via
    /// their own internal subscriber, if any), then notify observers (§5:
    /// "observers fire after subscribers"). Also used, recursively, to relay
    /// a lifted child event to a parent — there is nothing further to
    /// *mutate* at the parent, only to broadcast.
    pub(crate) fn emit_change(&'static self, handle_id: HandleId, change: StateChange) -> Result<()> {
        let reentered = IN_FLIGHT.with(|set| !set.borrow_mut().insert(handle_id));
        if reentered {
            // A relay loop found its way back to a handle already mid-dispatch
            // (e.g. a cyclic reactive graph); break it rather than recurse
            // forever (§3 invariant 7, §5 "Re-entrant mutation during emit").
            return Ok(());
        }
        let result = self.notify_subscribers(handle_id, &change).and_then(|_| {
            self.notify_observers(handle_id, &change);
            Ok(())
        });
        IN_FLIGHT.with(|set| {
            set.borrow_mut().remove(&handle_id);
        });
        self.devtools
            .notify(super::devtools::DevToolEvent::Change { change });
        result
    }

    fn notify_subscribers(&self, handle_id: HandleId, change: &StateChange) -> Result<()> {
        let (subscribers, exception_handlers, config) = match self.slots.get(&handle_id) {
            Some(meta) => (
                meta.subscribers.clone(),
                meta.exception_handlers.clone(),
                meta.config,
            ),
            None => return Ok(()),
        };
        broadcaster::emit(
            &subscribers,
            &exception_handlers,
            config.strict && config.production,
            change,
        )
    }

    fn notify_observers(&self, handle_id: HandleId, change: &StateChange) {
        let observer_ids: Vec<_> = match self.slots.get(&handle_id) {
            Some(meta) => meta.observers.iter().copied().collect(),
            None => return,
        };
        let tk = tracked_key_for(change);
        for observer_id in observer_ids {
            if let Some(weak) = self.observers.get(&observer_id) {
                if let Some(observer) = weak.upgrade() {
                    if observer.tracks(handle_id, &tk)
                        || observer.tracks(handle_id, &TrackedKey::ArrayMutations)
                        || observer.tracks(handle_id, &TrackedKey::CollectionMutations)
                    {
                        observer.notify();
                    }
                }
            }
        }
    }

    /// Reconcile a handle's reverse observer index with the `(gained, lost)`
    /// sets produced by [`Observer::run`] (§4.5 `assign(handle, observers)`:
    /// "used by interceptors to guarantee observer↔state bookkeeping is
    /// bidirectional").
    pub fn track_observer(
        &self,
        observer: &Arc<Observer>,
        gained: HashSet<HandleId>,
        lost: HashSet<HandleId>,
    ) {
        self.observers
            .insert(observer.id(), Arc::downgrade(observer));
        for handle_id in gained {
            if let Some(mut meta) = self.slots.get_mut(&handle_id) {
                meta.observers.insert(observer.id());
            }
        }
        for handle_id in lost {
            if let Some(mut meta) = self.slots.get_mut(&handle_id) {
                meta.observers.remove(&observer.id());
            }
        }
    }

    /// Stop tracking `observer` on every handle it was registered against
    /// (§4.5 `destroy()`: "detaches the observer from every handle it
    /// tracked").
    pub fn untrack_observer(&self, observer_id: super::id::ObserverId, handles: Vec<HandleId>) {
        for handle_id in handles {
            if let Some(mut meta) = self.slots.get_mut(&handle_id) {
                meta.observers.remove(&observer_id);
            }
        }
        self.observers.remove(&observer_id);
    }

    // ---------------------------------------------------------------
    // Inspection (§4.1, §6)
    // ---------------------------------------------------------------

    pub fn get(&self, handle: ReactiveHandle, silent: bool) -> Value {
        if !silent && ActiveObserver::is_active() {
            ActiveObserver::record_read(handle.id, TrackedKey::CollectionMutations);
        }
        self.resolve(handle.id)
    }

    pub fn snapshot(&self, handle: ReactiveHandle) -> Value {
        self.resolve(handle.id)
    }

    fn resolve(&self, id: HandleId) -> Value {
        match self.slots.get(&id) {
            Some(meta) => self.resolve_value(&meta.data),
            None => Value::Null,
        }
    }

    fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::Handle(id) => self.resolve(*id),
            Value::Record(m) => {
                Value::Record(m.iter().map(|(k, v)| (k.clone(), self.resolve_value(v))).collect())
            }
            Value::Sequence(v) => Value::Sequence(v.iter().map(|i| self.resolve_value(i)).collect()),
            Value::Map(m) => {
                Value::Map(m.iter().map(|(k, v)| (k.clone(), self.resolve_value(v))).collect())
            }
            other => other.clone(),
        }
    }

    pub fn has(&self, value: &Value) -> bool {
        self.find(value).is_some()
    }

    pub fn find(&self, value: &Value) -> Option<ReactiveHandle> {
        if let Value::Handle(id) = value {
            return self.slots.get(id).map(|m| ReactiveHandle::new(*id, m.shape));
        }
        self.slots
            .iter()
            .find(|e| !e.destroyed && &e.data == value)
            .map(|e| ReactiveHandle::new(e.id, e.shape))
    }

    // ---------------------------------------------------------------
    // Batch mutation helpers (§4.1)
    // ---------------------------------------------------------------

    fn guard_write(&self, id: HandleId) -> Result<HandleConfig> {
        let meta = self
            .slots
            .get(&id)
            .ok_or_else(|| ReactiveError::Contract {
                message: format!("handle {id} is not registered"),
            })?;
        if meta.destroyed {
            return Err(ReactiveError::Violation {
                handle: id,
                message: "write on destroyed handle".into(),
            });
        }
        if meta.config.immutable {
            return Err(ReactiveError::Violation {
                handle: id,
                message: "write on immutable handle".into(),
            });
        }
        Ok(meta.config)
    }

    pub fn assign(&'static self, handle: ReactiveHandle, patch: Vec<(String, Value)>) -> Result<()> {
        let config = self.guard_write(handle.id)?;
        let root_id = self.root_or_self(handle.id);
        let mut prev_entries = Vec::new();
        let mut new_entries = Vec::new();
        for (k, v) in patch {
            let (prev, old_child) = {
                let meta = self.slots.get(&handle.id).ok_or_else(|| ReactiveError::Contract {
                    message: format!("handle {} is not registered", handle.id),
                })?;
                let record = meta.data.as_record().ok_or_else(|| ReactiveError::Contract {
                    message: "assign requires a record handle".into(),
                })?;
                let prev = record.get(&k).cloned().unwrap_or(Value::Null);
                (prev.clone(), prev.as_handle())
            };
            let prepared = self.prepare_incoming(v, config, root_id);
            if prepared == prev {
                continue;
            }
            {
                let mut meta = self.slots.get_mut(&handle.id).unwrap();
                meta.data
                    .as_record_mut()
                    .unwrap()
                    .insert(k.clone(), prepared.clone());
            }
            if let Some(old) = old_child {
                if prepared.as_handle() != Some(old) {
                    self.unlink_child(handle.id, &Key::Str(k.clone()));
                }
            }
            if let Some(new_child) = prepared.as_handle() {
                self.link_child(handle.id, Key::Str(k.clone()), new_child);
            }
            prev_entries.push((k.clone(), prev));
            new_entries.push((k, prepared));
        }
        if new_entries.is_empty() {
            return Ok(());
        }
        let change = StateChange::new(ChangeType::Assign, handle.id)
            .with_value(Value::Record(new_entries.into_iter().collect()))
            .with_prev(Value::Record(prev_entries.into_iter().collect()));
        self.emit_change(handle.id, change)
    }

    pub fn remove(&'static self, handle: ReactiveHandle, keys: Vec<Key>) -> Result<()> {
        self.guard_write(handle.id)?;
        let mut removed = Vec::new();
        for key in &keys {
            let prev = self.delete_entry(handle.id, key)?;
            if let Some(prev) = prev {
                removed.push((key.clone(), prev));
            }
        }
        if removed.is_empty() {
            return Ok(());
        }
        let change = StateChange::new(ChangeType::Remove, handle.id)
            .with_prev(Value::Map(removed.into_iter().collect()));
        self.emit_change(handle.id, change)
    }

    /// Remove a single key from a record or keyed-map slot, unlinking any
    /// child that was there. Returns the previous value, if any.
    fn delete_entry(&'static self, handle_id: HandleId, key: &Key) -> Result<Option<Value>> {
        let (prev, shape) = {
            let mut meta = self.slots.get_mut(&handle_id).ok_or_else(|| ReactiveError::Contract {
                message: format!("handle {handle_id} is not registered"),
            })?;
            let shape = meta.shape;
            let prev = match shape {
                ShapeKind::Record => {
                    if let Key::Str(s) = key {
                        meta.data.as_record_mut().and_then(|r| r.shift_remove(s))
                    } else {
                        None
                    }
                }
                ShapeKind::Map => meta.data.as_map_mut().and_then(|m| m.shift_remove(key)),
                _ => {
                    return Err(ReactiveError::Contract {
                        message: "remove requires a record or keyed-map handle".into(),
                    })
                }
            };
            (prev, shape)
        };
        let _ = shape;
        if let Some(child_id) = prev.as_ref().and_then(|v| v.as_handle()) {
            let _ = child_id;
            self.unlink_child(handle_id, key);
        }
        Ok(prev)
    }

    pub fn clear(&'static self, handle: ReactiveHandle) -> Result<()> {
        self.guard_write(handle.id)?;
        let prev = {
            let meta = self.slots.get(&handle.id).ok_or_else(|| ReactiveError::Contract {
                message: format!("handle {} is not registered", handle.id),
            })?;
            match meta.shape {
                ShapeKind::Record => Value::Record(meta.data.as_record().cloned().unwrap_or_default()),
                ShapeKind::Map => Value::Map(meta.data.as_map().cloned().unwrap_or_default()),
                ShapeKind::Set => Value::Set(meta.data.as_set().cloned().unwrap_or_default()),
                ShapeKind::Sequence => Value::Sequence(meta.data.as_sequence().cloned().unwrap_or_default()),
                ShapeKind::Scalar => {
                    return Err(ReactiveError::Contract {
                        message: "clear requires a linkable handle".into(),
                    })
                }
            }
        };
        let keys_to_unlink: Vec<PathKey> = match &prev {
            Value::Record(m) => m.keys().cloned().map(Key::Str).collect(),
            Value::Map(m) => m.keys().cloned().collect(),
            Value::Sequence(v) => (0..v.len() as i64).map(Key::Int).collect(),
            _ => Vec::new(),
        };
        {
            let mut meta = self.slots.get_mut(&handle.id).unwrap();
            match meta.shape {
                ShapeKind::Record => meta.data = Value::Record(IndexMap::new()),
                ShapeKind::Map => meta.data = Value::Map(IndexMap::new()),
                ShapeKind::Set => meta.data = Value::Set(Default::default()),
                ShapeKind::Sequence => meta.data = Value::Sequence(Vec::new()),
                ShapeKind::Scalar => unreachable!(),
            }
        }
        for key in keys_to_unlink {
            self.unlink_child(handle.id, &key);
        }
        let change = StateChange::new(ChangeType::Clear, handle.id).with_prev(prev);
        self.emit_change(handle.id, change)
    }

    pub fn destroy(&'static self, handle: ReactiveHandle, force: bool) -> bool {
        if self.is_destroyed(handle.id) {
            return true;
        }
        if !force && self.has_external_subscribers(handle.id) {
            diagnostics::capture(&ReactiveError::Violation {
                handle: handle.id,
                message: "destroy refused: external subscribers remain".into(),
            });
            return false;
        }
        for parent in self.links.parents_of(handle.id) {
            for (key, child) in self.links.children_of(parent) {
                if child == handle.id {
                    self.unlink_child(parent, &key);
                }
            }
        }
        self.destroy_internal(handle.id);
        true
    }

    pub fn catch(&self, handle: ReactiveHandle, f: ExceptionCallback) -> u64 {
        self.slots
            .get_mut(&handle.id)
            .map(|mut m| m.add_exception_handler(f))
            .unwrap_or(0)
    }

    pub fn uncatch(&self, handle: ReactiveHandle, token: u64) {
        if let Some(mut m) = self.slots.get_mut(&handle.id) {
            m.remove_exception_handler(token);
        }
    }

    pub fn subscribe(&self, handle: ReactiveHandle, callback: ChangeCallback) -> SubscriptionToken {
        let (sub_id, dup) = self
            .slots
            .get_mut(&handle.id)
            .map(|mut m| m.add_subscriber(callback, false))
            .unwrap_or((0, false));
        if dup {
            diagnostics::capture(&ReactiveError::Argument {
                message: "duplicate subscription returns the existing unsubscribe".into(),
            });
        }
        SubscriptionToken {
            handle: handle.id,
            id: sub_id,
        }
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        if let Some(mut m) = self.slots.get_mut(&token.handle) {
            m.remove_subscriber(token.id);
        }
    }

    /// Apply an in-place configuration change (§6 `configure`). Used for
    /// runtime toggles such as flipping `production` on for a handle that
    /// started noisy in development.
    pub fn configure(&self, handle: ReactiveHandle, f: impl FnOnce(&mut HandleConfig)) {
        if let Some(mut m) = self.slots.get_mut(&handle.id) {
            f(&mut m.config);
        }
    }

    /// Every live handle's configuration (§6 `configs`), for dev-tool style
    /// introspection.
    pub fn configs(&self) -> Vec<(HandleId, HandleConfig)> {
        self.slots
            .iter()
            .filter(|e| !e.destroyed)
            .map(|e| (e.id, e.config))
            .collect()
    }

    // -----------------------------------------------------------------
    // Per-shape write primitives, called by `interceptor/*` (§4.3, L3)
    // -----------------------------------------------------------------

    fn require_shape(&self, id: HandleId, shape: ShapeKind) -> Result<()> {
        let meta = self.slots.get(&id).ok_or_else(|| ReactiveError::Contract {
            message: format!("handle {id} is not registered"),
        })?;
        if meta.shape != shape {
            return Err(ReactiveError::Contract {
                message: format!("expected a {shape:?} handle, found {:?}", meta.shape),
            });
        }
        Ok(())
    }

    /// Validate `candidate` against a handle's schema, if any. `None` means
    /// either no schema or acceptance; `Some` carries the rejection to
    /// surface on the `StateChange` (§4.6, §7 "Validation").
    fn validate(&self, id: HandleId, candidate: &Value) -> Option<(String, Vec<String>)> {
        let schema = self.slots.get(&id)?.schema.clone()?;
        let outcome = schema.parse(candidate);
        if outcome.success {
            None
        } else {
            Some((outcome.error.unwrap_or_default(), outcome.issues))
        }
    }

    pub(crate) fn record_set(&'static self, handle: ReactiveHandle, key: &str, value: Value) -> Result<()> {
        self.require_shape(handle.id, ShapeKind::Record)?;
        let config = self.guard_write(handle.id)?;
        let root_id = self.root_or_self(handle.id);
        let prev = self
            .slots
            .get(&handle.id)
            .and_then(|m| m.data.as_record().and_then(|r| r.get(key)).cloned())
            .unwrap_or(Value::Null);
        let prepared = self.prepare_incoming(value, config, root_id);
        if prepared == prev {
            return Ok(());
        }

        let mut candidate = self.slots.get(&handle.id).unwrap().data.as_record().cloned().unwrap_or_default();
        candidate.insert(key.to_string(), prepared.clone());
        if let Some((message, issues)) = self.validate(handle.id, &Value::Record(candidate)) {
            let error = ReactiveError::Validation {
                handle: handle.id,
                path: key.to_string(),
                message,
                issues: issues.clone(),
            };
            let change = StateChange::new(ChangeType::Set, handle.id)
                .with_keys(vec![Key::Str(key.to_string())])
                .with_value(prepared)
                .with_prev(prev)
                .with_error(error, issues);
            return self.emit_change(handle.id, change);
        }

        let old_child = prev.as_handle();
        {
            let mut meta = self.slots.get_mut(&handle.id).unwrap();
            meta.data.as_record_mut().unwrap().insert(key.to_string(), prepared.clone());
        }
        let new_child = prepared.as_handle();
        if old_child != new_child {
            if old_child.is_some() {
                self.unlink_child(handle.id, &Key::Str(key.to_string()));
            }
            if let Some(child) = new_child {
                self.link_child(handle.id, Key::Str(key.to_string()), child);
            }
        }
        let change = StateChange::new(ChangeType::Set, handle.id)
            .with_keys(vec![Key::Str(key.to_string())])
            .with_value(prepared)
            .with_prev(prev);
        self.emit_change(handle.id, change)
    }

    pub(crate) fn record_delete(&'static self, handle: ReactiveHandle, key: &str) -> Result<()> {
        self.require_shape(handle.id, ShapeKind::Record)?;
        self.guard_write(handle.id)?;
        let prev = self.delete_entry(handle.id, &Key::Str(key.to_string()))?;
        let prev = match prev {
            Some(p) => p,
            None => return Ok(()),
        };
        let change = StateChange::new(ChangeType::Delete, handle.id)
            .with_keys(vec![Key::Str(key.to_string())])
            .with_prev(prev);
        self.emit_change(handle.id, change)
    }

    pub(crate) fn map_set(&'static self, handle: ReactiveHandle, key: Key, value: Value) -> Result<()> {
        self.require_shape(handle.id, ShapeKind::Map)?;
        let config = self.guard_write(handle.id)?;
        let root_id = self.root_or_self(handle.id);
        let prev = self
            .slots
            .get(&handle.id)
            .and_then(|m| m.data.as_map().and_then(|r| r.get(&key)).cloned())
            .unwrap_or(Value::Null);
        let prepared = self.prepare_incoming(value, config, root_id);
        if prepared == prev {
            return Ok(());
        }
        let old_child = prev.as_handle();
        {
            let mut meta = self.slots.get_mut(&handle.id).unwrap();
            meta.data.as_map_mut().unwrap().insert(key.clone(), prepared.clone());
        }
        let new_child = prepared.as_handle();
        if old_child != new_child {
            if old_child.is_some() {
                self.unlink_child(handle.id, &key);
            }
            if let Some(child) = new_child {
                self.link_child(handle.id, key.clone(), child);
            }
        }
        let change = StateChange::new(ChangeType::Set, handle.id)
            .with_keys(vec![key])
            .with_value(prepared)
            .with_prev(prev);
        self.emit_change(handle.id, change)
    }

    pub(crate) fn map_delete(&'static self, handle: ReactiveHandle, key: Key) -> Result<()> {
        self.require_shape(handle.id, ShapeKind::Map)?;
        self.guard_write(handle.id)?;
        let prev = self.delete_entry(handle.id, &key)?;
        let prev = match prev {
            Some(p) => p,
            None => return Ok(()),
        };
        let change = StateChange::new(ChangeType::Delete, handle.id)
            .with_keys(vec![key])
            .with_prev(prev);
        self.emit_change(handle.id, change)
    }

    pub(crate) fn set_add(&'static self, handle: ReactiveHandle, item: Key) -> Result<()> {
        self.require_shape(handle.id, ShapeKind::Set)?;
        self.guard_write(handle.id)?;
        let inserted = {
            let mut meta = self.slots.get_mut(&handle.id).ok_or_else(|| ReactiveError::Contract {
                message: format!("handle {} is not registered", handle.id),
            })?;
            meta.data.as_set_mut().unwrap().insert(item.clone())
        };
        if !inserted {
            return Ok(());
        }
        let change = StateChange::new(ChangeType::Add, handle.id).with_value(Value::from(item.to_string()));
        self.emit_change(handle.id, change)
    }

    pub(crate) fn set_delete(&'static self, handle: ReactiveHandle, item: Key) -> Result<()> {
        self.require_shape(handle.id, ShapeKind::Set)?;
        self.guard_write(handle.id)?;
        let removed = {
            let mut meta = self.slots.get_mut(&handle.id).ok_or_else(|| ReactiveError::Contract {
                message: format!("handle {} is not registered", handle.id),
            })?;
            meta.data.as_set_mut().unwrap().shift_remove(&item)
        };
        if !removed {
            return Ok(());
        }
        let change = StateChange::new(ChangeType::Delete, handle.id).with_prev(Value::from(item.to_string()));
        self.emit_change(handle.id, change)
    }

    /// Replace a sequence's backing `Vec`, relinking every positional child
    /// from scratch. Index-keyed links are inherently invalidated by any
    /// structural mutation (insert/remove/reorder shifts every index after
    /// the touched point), so rather than patching individual edges this
    /// unlinks everything under the handle and relinks the new positions —
    /// simpler than incremental re-indexing and no more expensive than the
    /// mutation itself, which already touches the whole backing vector.
    fn relink_sequence(&'static self, handle_id: HandleId, new_items: Vec<Value>) -> Vec<Value> {
        let old_len = self
            .slots
            .get(&handle_id)
            .and_then(|m| m.data.as_sequence().map(|s| s.len()))
            .unwrap_or(0);
        for i in 0..old_len {
            self.unlink_child(handle_id, &Key::Int(i as i64));
        }
        let root_id = self.root_or_self(handle_id);
        let config = self.config_of(handle_id).unwrap_or_default();
        let mut out = Vec::with_capacity(new_items.len());
        for (i, item) in new_items.into_iter().enumerate() {
            let prepared = self.prepare_incoming(item, config, root_id);
            if let Some(child) = prepared.as_handle() {
                self.link_child(handle_id, Key::Int(i as i64), child);
            }
            out.push(prepared);
        }
        out
    }

    /// Apply a sequence mutation in place via `f`, then relink and, if an
    /// `ordered` comparator is configured, re-sort — emitting the structural
    /// event's own `StateChange` followed by a trailing `sort` event only
    /// when the comparator actually changed the order (SPEC_FULL §E).
    fn sequence_mutate(
        &'static self,
        handle: ReactiveHandle,
        change_type: ChangeType,
        f: impl FnOnce(&mut Vec<Value>) -> (Value, Value),
    ) -> Result<()> {
        self.require_shape(handle.id, ShapeKind::Sequence)?;
        self.guard_write(handle.id)?;
        let (value, prev, relinked) = {
            let mut meta = self.slots.get_mut(&handle.id).unwrap();
            let seq = meta.data.as_sequence_mut().unwrap();
            let (value, prev) = f(seq);
            let items = std::mem::take(seq);
            (value, prev, items)
        };
        let relinked = self.relink_sequence(handle.id, relinked);
        {
            let mut meta = self.slots.get_mut(&handle.id).unwrap();
            meta.data = Value::Sequence(relinked.clone());
        }
        let change = StateChange::new(change_type, handle.id).with_value(value).with_prev(prev);
        self.emit_change(handle.id, change)?;

        let comparator = self.slots.get(&handle.id).and_then(|m| m.comparator.clone());
        if let Some(comparator) = comparator {
            let before = relinked.clone();
            let mut sorted = relinked;
            sorted.sort_by(|a, b| comparator(a, b));
            if sorted != before {
                let sorted = self.relink_sequence(handle.id, sorted);
                let prev_order = Value::Sequence(before);
                let new_order = Value::Sequence(sorted.clone());
                {
                    let mut meta = self.slots.get_mut(&handle.id).unwrap();
                    meta.data = Value::Sequence(sorted);
                }
                let sort_change = StateChange::new(ChangeType::Sort, handle.id)
                    .with_value(new_order)
                    .with_prev(prev_order);
                self.emit_change(handle.id, sort_change)?;
            }
        }
        Ok(())
    }

    pub(crate) fn sequence_push(&'static self, handle: ReactiveHandle, items: Vec<Value>) -> Result<()> {
        self.sequence_mutate(handle, ChangeType::Push, |seq| {
            let prev_len = seq.len();
            seq.extend(items.clone());
            (Value::Sequence(items), Value::Number(prev_len as f64))
        })
    }

    pub(crate) fn sequence_pop(&'static self, handle: ReactiveHandle) -> Result<Value> {
        let popped = std::cell::RefCell::new(Value::Null);
        self.sequence_mutate(handle, ChangeType::Pop, |seq| {
            let value = seq.pop().unwrap_or(Value::Null);
            *popped.borrow_mut() = value.clone();
            (Value::Null, value)
        })?;
        Ok(popped.into_inner())
    }

    pub(crate) fn sequence_shift(&'static self, handle: ReactiveHandle) -> Result<Value> {
        let shifted = std::cell::RefCell::new(Value::Null);
        self.sequence_mutate(handle, ChangeType::Shift, |seq| {
            let value = if seq.is_empty() { Value::Null } else { seq.remove(0) };
            *shifted.borrow_mut() = value.clone();
            (Value::Null, value)
        })?;
        Ok(shifted.into_inner())
    }

    pub(crate) fn sequence_unshift(&'static self, handle: ReactiveHandle, items: Vec<Value>) -> Result<()> {
        self.sequence_mutate(handle, ChangeType::Unshift, |seq| {
            for (i, item) in items.iter().cloned().enumerate() {
                seq.insert(i, item);
            }
            (Value::Sequence(items), Value::Null)
        })
    }

    pub(crate) fn sequence_splice(
        &'static self,
        handle: ReactiveHandle,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<()> {
        self.sequence_mutate(handle, ChangeType::Splice, |seq| {
            let end = (start + delete_count).min(seq.len());
            let clamped_start = start.min(seq.len());
            let removed: Vec<Value> = seq.splice(clamped_start..end, items.clone()).collect();
            let mut args = vec![Value::Number(clamped_start as f64), Value::Number(removed.len() as f64)];
            args.extend(items);
            (Value::Sequence(args), Value::Sequence(removed))
        })
    }

    pub(crate) fn sequence_sort(
        &'static self,
        handle: ReactiveHandle,
        comparator: &dyn Fn(&Value, &Value) -> std::cmp::Ordering,
    ) -> Result<()> {
        self.sequence_mutate(handle, ChangeType::Sort, |seq| {
            let prev = seq.clone();
            seq.sort_by(|a, b| comparator(a, b));
            (Value::Sequence(seq.clone()), Value::Sequence(prev))
        })
    }

    pub(crate) fn sequence_reverse(&'static self, handle: ReactiveHandle) -> Result<()> {
        self.sequence_mutate(handle, ChangeType::Reverse, |seq| {
            let prev = seq.clone();
            seq.reverse();
            (Value::Sequence(seq.clone()), Value::Sequence(prev))
        })
    }

    pub(crate) fn sequence_fill(
        &'static self,
        handle: ReactiveHandle,
        value: Value,
        start: usize,
        end: Option<usize>,
    ) -> Result<()> {
        self.sequence_mutate(handle, ChangeType::Fill, |seq| {
            let prev = seq.clone();
            let end = end.unwrap_or(seq.len()).min(seq.len());
            let start = start.min(seq.len());
            for slot in seq.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
            (Value::Sequence(seq.clone()), Value::Sequence(prev))
        })
    }

    pub(crate) fn sequence_copy_within(
        &'static self,
        handle: ReactiveHandle,
        target: usize,
        start: usize,
        end: Option<usize>,
    ) -> Result<()> {
        self.sequence_mutate(handle, ChangeType::CopyWithin, |seq| {
            let prev = seq.clone();
            let len = seq.len();
            let end = end.unwrap_or(len).min(len);
            let start = start.min(len);
            if start < end && target < len {
                let slice: Vec<Value> = seq[start..end].to_vec();
                for (i, v) in slice.into_iter().enumerate() {
                    if target + i >= len {
                        break;
                    }
                    seq[target + i] = v;
                }
            }
            (Value::Sequence(seq.clone()), Value::Sequence(prev))
        })
    }
}

/// The first segment of a change's key path is what the relational graph's
/// observer-key propagation filters on (§4.4); structural events carry no
/// keys at all and fall back to the appropriate sentinel.
fn tracked_key_for(change: &StateChange) -> TrackedKey {
    if let Some(first) = change.keys.first() {
        TrackedKey::Key(first.clone())
    } else if change.change_type.is_sequence_structural() {
        TrackedKey::ArrayMutations
    } else {
        TrackedKey::CollectionMutations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record(pairs: &[(&str, Value)]) -> Value {
        Value::Record(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn wrap_non_linkable_returns_input_verbatim() {
        let reg = registry();
        match reg.wrap(Value::Number(1.0), HandleConfig::default()) {
            WrapOutcome::Unchanged(Value::Number(n)) => assert_eq!(n, 1.0),
            _ => panic!("expected Unchanged"),
        }
    }

    #[test]
    fn wrap_record_recursively_wraps_nested_records() {
        let reg = registry();
        let nested = record(&[("name", Value::from("J"))]);
        let root = record(&[("user", nested)]);
        let handle = reg.wrap(root, HandleConfig::default()).handle().unwrap();
        let snap = reg.get(handle, true);
        match snap {
            Value::Record(m) => match m.get("user") {
                Some(Value::Record(u)) => assert_eq!(u.get("name"), Some(&Value::from("J"))),
                _ => panic!("expected nested record"),
            },
            _ => panic!("expected record"),
        }

        // The raw stored slot is a Handle reference, not an owned copy.
        let raw = reg.slots.get(&handle.id).unwrap();
        assert!(matches!(raw.data.as_record().unwrap().get("user"), Some(Value::Handle(_))));
    }

    #[test]
    fn reentrant_wrap_of_the_same_handle_returns_it_unchanged() {
        let reg = registry();
        let handle = reg
            .wrap(record(&[("x", Value::from(1i64))]), HandleConfig::default())
            .handle()
            .unwrap();
        let rewrapped = reg.wrap(Value::Handle(handle.id), HandleConfig::default());
        assert_eq!(rewrapped.handle(), Some(handle));
    }

    #[test]
    fn nested_write_emits_one_event_with_lifted_keys() {
        let reg = registry();
        let nested = record(&[("name", Value::from("J"))]);
        let root = record(&[("user", nested)]);
        let handle = reg.wrap(root, HandleConfig::default()).handle().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let last_keys = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let hits_clone = hits.clone();
        let keys_clone = last_keys.clone();
        reg.subscribe(
            handle,
            Arc::new(move |change: &StateChange| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                *keys_clone.lock() = change.keys.clone();
            }),
        );

        let user_handle = match reg.slots.get(&handle.id).unwrap().data.as_record().unwrap().get("user") {
            Some(Value::Handle(id)) => ReactiveHandle::new(*id, ShapeKind::Record),
            _ => panic!("expected linked child"),
        };
        super::super::interceptor::record::set(user_handle, "name", Value::from("K")).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(*last_keys.lock(), vec![PathKey::from("user"), PathKey::from("name")]);
    }

    #[test]
    fn immutable_handle_refuses_writes() {
        let reg = registry();
        let handle = reg
            .wrap(record(&[("x", Value::from(1i64))]), HandleConfig::immutable())
            .handle()
            .unwrap();
        let err = super::super::interceptor::record::set(handle, "x", Value::from(2i64)).unwrap_err();
        assert!(matches!(err, ReactiveError::Violation { .. }));
        assert_eq!(
            reg.slots.get(&handle.id).unwrap().data.as_record().unwrap().get("x"),
            Some(&Value::from(1i64))
        );
    }

    #[test]
    fn destroy_refuses_with_external_subscribers_unless_forced() {
        let reg = registry();
        let handle = reg
            .wrap(record(&[("x", Value::from(1i64))]), HandleConfig::default())
            .handle()
            .unwrap();
        reg.subscribe(handle, Arc::new(|_| {}));
        assert!(!reg.destroy(handle, false));
        assert!(reg.destroy(handle, true));
        assert!(reg.is_destroyed(handle.id));
    }

    #[test]
    fn destroy_is_idempotent() {
        let reg = registry();
        let handle = reg
            .wrap(record(&[("x", Value::from(1i64))]), HandleConfig::default())
            .handle()
            .unwrap();
        assert!(reg.destroy(handle, false));
        assert!(reg.destroy(handle, false));
    }

    #[test]
    fn assign_batches_into_one_event() {
        let reg = registry();
        let handle = reg
            .wrap(
                record(&[("a", Value::from(1i64)), ("b", Value::from(2i64))]),
                HandleConfig::default(),
            )
            .handle()
            .unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        reg.subscribe(
            handle,
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        reg.assign(handle, vec![("a".into(), Value::from(10i64)), ("b".into(), Value::from(20i64))])
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
