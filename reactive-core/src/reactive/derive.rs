//! Derivation: pipes, bindings, and refs (§4.6, L6).
//!
//! Everything here is built on two already-synchronous primitives —
//! [`Registry::subscribe`](super::registry::Registry::subscribe) and the
//! [`Observer`](super::observer::Observer) core — rather than a separate
//! dependency-graph scheduler. Spec §5 rules out suspension points inside
//! the engine (single-threaded cooperative, no lazy-pull dirty propagation),
//! so a derived value's "dependencies changed, recompute" loop is just an
//! observer whose `onChange` re-runs the same closure it ran last time,
//! exactly like `Observer::run`'s own diffing was designed to support.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::change::{ChangeType, StateChange};
use super::diagnostics;
use super::error::{ReactiveError, Result};
use super::handle::{ChangeCallback, HandleConfig, ReactiveHandle, SubscriptionToken};
use super::interceptor::{map, record, sequence};
use super::observer::Observer;
use super::registry::registry;
use super::value::{Key, Value};

/// `derive(handle, fn, emitInit?)` (§6, alias of `subscribe`). If
/// `emit_init` (default true), `fn` runs once synchronously against a
/// synthetic `{type: init}` event before the subscription is installed.
pub fn derive(handle: ReactiveHandle, callback: ChangeCallback, emit_init: bool) -> SubscriptionToken {
    if emit_init {
        callback(&StateChange::init(handle.id));
    }
    registry().subscribe(handle, callback)
}

pub fn dispose(token: SubscriptionToken) {
    registry().unsubscribe(token);
}

/// Where a [`pipe`] writes its transformed value: either straight into
/// another reactive handle's whole contents, or into an arbitrary
/// "style-like" write-target (§4.6: "any object with settable keys"), such
/// as a host-owned struct exposing per-key setters.
#[derive(Clone)]
pub enum PipeTarget {
    Handle(ReactiveHandle),
    Keyed(Arc<dyn Fn(Key, Value) + Send + Sync>),
}

impl PipeTarget {
    fn write(&self, value: Value) {
        match self {
            PipeTarget::Handle(handle) => write_whole(*handle, value),
            PipeTarget::Keyed(setter) => match value {
                Value::Record(fields) => {
                    for (k, v) in fields {
                        setter(Key::Str(k), v);
                    }
                }
                Value::Map(entries) => {
                    for (k, v) in entries {
                        setter(k, v);
                    }
                }
                other => setter(Key::Str("value".into()), other),
            },
        }
    }
}

/// Replace a handle's whole underlying value in one shot — the write-side
/// counterpart of `registry().snapshot`, used when a pipe's sink is itself a
/// reactive handle rather than a bare write-target.
fn write_whole(handle: ReactiveHandle, value: Value) {
    match value {
        Value::Record(fields) => {
            let _ = registry().assign(handle, fields.into_iter().collect());
        }
        Value::Sequence(items) => {
            let len = sequence::len(handle);
            let _ = sequence::splice(handle, 0, len, items);
        }
        Value::Map(entries) => {
            for (k, v) in entries {
                let _ = map::set(handle, k, v);
            }
        }
        other => {
            let _ = record::set(handle, "value", other);
        }
    }
}

pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// `derive.pipe(source, sink, transform?)` (§6, §4.6): on every non-`init`
/// change of `source`, write `transform(snapshot(source))` (or the bare
/// snapshot, with no transform) into `sink`. Returns the token disposal
/// unsubscribes.
pub fn pipe(source: ReactiveHandle, sink: PipeTarget, transform: Option<Transform>) -> SubscriptionToken {
    registry().subscribe(
        source,
        Arc::new(move |change: &StateChange| {
            if matches!(change.change_type, ChangeType::Init) {
                return;
            }
            let snapshot = registry().snapshot(source);
            let value = match &transform {
                Some(f) => f(snapshot),
                None => snapshot,
            };
            sink.write(value);
        }),
    )
}

/// `binding(source, target, key)` (§4.6): a two-way link for one scalar
/// record field. Loop suppression is by value equality rather than a
/// re-entrancy flag — each side only writes if the incoming value actually
/// differs from what's already there, so the write it triggers on the other
/// side is itself a no-op and the chain terminates after one hop.
pub fn binding(source: ReactiveHandle, target: ReactiveHandle, key: &str) -> (SubscriptionToken, SubscriptionToken) {
    let key_for_source = key.to_string();
    let forward = registry().subscribe(
        source,
        Arc::new(move |change: &StateChange| {
            if !touches_key(change, &key_for_source) {
                return;
            }
            let value = record::get(source, &key_for_source, true);
            if record::get(target, &key_for_source, true) != value {
                let _ = record::set(target, &key_for_source, value);
            }
        }),
    );
    let key_for_target = key.to_string();
    let backward = registry().subscribe(
        target,
        Arc::new(move |change: &StateChange| {
            if !touches_key(change, &key_for_target) {
                return;
            }
            let value = record::get(target, &key_for_target, true);
            if record::get(source, &key_for_target, true) != value {
                let _ = record::set(source, &key_for_target, value);
            }
        }),
    );
    (forward, backward)
}

fn touches_key(change: &StateChange, key: &str) -> bool {
    if matches!(change.change_type, ChangeType::Init) {
        return false;
    }
    match change.keys.first() {
        Some(Key::Str(s)) => s == key,
        // Assign/clear-style batch events carry no key prefix; conservatively
        // re-check every bound field rather than miss an update.
        None => matches!(change.change_type, ChangeType::Assign | ChangeType::Remove | ChangeType::Clear),
        _ => false,
    }
}

/// A scalar read/write surface (§4.6 "Refs"). The four flavors share this
/// interface and differ only in what `set` does underneath.
pub trait ScalarRef: Send + Sync {
    fn get(&self) -> Value;
    fn set(&self, value: Value) -> Result<()>;
}

/// Read/write scalar backed by one record field.
pub struct MutableRef {
    handle: ReactiveHandle,
    key: String,
}

impl MutableRef {
    pub fn new(handle: ReactiveHandle, key: impl Into<String>) -> Self {
        Self {
            handle,
            key: key.into(),
        }
    }
}

impl ScalarRef for MutableRef {
    fn get(&self) -> Value {
        record::get(self.handle, &self.key, false)
    }

    fn set(&self, value: Value) -> Result<()> {
        record::set(self.handle, &self.key, value)
    }
}

/// Read-only scalar; `set` diagnoses instead of writing (§4.6: "writes
/// diagnose").
pub struct ImmutableRef {
    handle: ReactiveHandle,
    key: String,
}

impl ImmutableRef {
    pub fn new(handle: ReactiveHandle, key: impl Into<String>) -> Self {
        Self {
            handle,
            key: key.into(),
        }
    }
}

impl ScalarRef for ImmutableRef {
    fn get(&self) -> Value {
        record::get(self.handle, &self.key, false)
    }

    fn set(&self, _value: Value) -> Result<()> {
        diagnostics::capture(&ReactiveError::Violation {
            handle: self.handle.id,
            message: format!("immutable ref '{}' cannot be set", self.key),
        });
        Ok(())
    }
}

/// Read-only scalar recomputed whenever any handle/key its `compute` closure
/// reads is touched (§4.6: "derived ... recomputed when dependencies
/// change"). Grounded on [`Observer::run`]'s own diffing — `compute` runs
/// inside the observer's tracking frame on construction and on every
/// `onChange`, so its dependency set is always exactly what it read last.
pub struct DerivedRef {
    id: super::id::HandleId,
    observer: Arc<Observer>,
    compute: Arc<dyn Fn() -> Value + Send + Sync>,
    cache: RwLock<Value>,
}

impl DerivedRef {
    pub fn new(compute: impl Fn() -> Value + Send + Sync + 'static) -> Arc<Self> {
        let compute: Arc<dyn Fn() -> Value + Send + Sync> = Arc::new(compute);
        Arc::new_cyclic(|weak: &Weak<DerivedRef>| {
            let weak = weak.clone();
            let observer = Observer::new(
                Some("derived-ref".into()),
                Arc::new(move || {
                    if let Some(this) = weak.upgrade() {
                        this.recompute();
                    }
                }),
            );
            let (initial, gained, lost) = observer.run(|| compute());
            registry().track_observer(&observer, gained, lost);
            Self {
                id: super::id::HandleId::new(),
                observer,
                compute,
                cache: RwLock::new(initial),
            }
        })
    }

    fn recompute(&self) {
        let compute = self.compute.clone();
        let (value, gained, lost) = self.observer.run(move || compute());
        registry().track_observer(&self.observer, gained, lost);
        *self.cache.write() = value;
    }

    /// Detach from every handle this ref's `compute` read; idempotent with
    /// [`Observer::destroy`].
    pub fn destroy(&self) {
        let handles = self.observer.destroy();
        registry().untrack_observer(self.observer.id(), handles);
    }
}

impl ScalarRef for DerivedRef {
    fn get(&self) -> Value {
        self.cache.read().clone()
    }

    fn set(&self, _value: Value) -> Result<()> {
        diagnostics::capture(&ReactiveError::Violation {
            handle: self.id,
            message: "derived ref cannot be set".into(),
        });
        Ok(())
    }
}

/// Scalar whose writes are handed to a caller-supplied setter instead of
/// landing in the registry directly (§4.6: "set-via-callback semantics") —
/// e.g. a ref backing a form field whose owner wants to validate or
/// transform every write before (optionally) applying it.
pub struct VariableRef {
    value: RwLock<Value>,
    on_set: Arc<dyn Fn(Value) + Send + Sync>,
}

impl VariableRef {
    pub fn new(initial: Value, on_set: impl Fn(Value) + Send + Sync + 'static) -> Self {
        Self {
            value: RwLock::new(initial),
            on_set: Arc::new(on_set),
        }
    }

    /// Called by the owner once it has decided to accept an incoming write,
    /// to update what `get` subsequently returns.
    pub fn update(&self, value: Value) {
        *self.value.write() = value;
    }
}

impl ScalarRef for VariableRef {
    fn get(&self) -> Value {
        self.value.read().clone()
    }

    fn set(&self, value: Value) -> Result<()> {
        (self.on_set)(value);
        Ok(())
    }
}
