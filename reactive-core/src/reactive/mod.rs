//! Reactive state engine.
//!
//! Mutation interception over four linkable shapes (record, sequence, keyed
//! map, set) feeding a handle registry, a parent/child relational graph, a
//! panic-isolated broadcaster, an observer/dependency-tracking core, a
//! derivation layer built on top of it, and a history/undo-redo recorder.
//! Submodules roughly follow the module breakdown this engine is organized
//! around: `registry` owns the factory and the write paths, `interceptor`
//! holds the per-shape read/write surface that `registry` delegates to,
//! `links` is the parent-child graph, `broadcaster`/`observer`/`tracking`
//! are the subscription and dependency-tracking machinery, and
//! `derive`/`history`/`context` are built entirely on top of that public
//! surface rather than reaching back into `registry`'s internals.

pub mod batcher;
pub mod broadcaster;
pub mod change;
pub mod context;
pub mod derive;
pub mod devtools;
pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod history;
pub mod id;
pub mod interceptor;
pub mod links;
pub mod observer;
pub mod registry;
pub mod schema;
pub mod tracking;
pub mod value;

pub use change::{ChangeType, StateChange};
pub use context::{
    activate_context, create_context, get_context, is_context_active, set_context,
    set_context_store, ContextFrame, ContextGuard, ContextStore,
};
pub use derive::{
    binding, derive as derive_fn, dispose, pipe, DerivedRef, ImmutableRef, MutableRef, PipeTarget,
    ScalarRef, Transform, VariableRef,
};
pub use devtools::{DevToolEvent, DevToolHook, DevToolRegistry, DevToolToken, RecordingHook};
pub use diagnostics::Diagnostic;
pub use error::{ErrorKind, ReactiveError, Result};
pub use handle::{
    ChangeCallback, Comparator, ExceptionCallback, HandleConfig, ReactiveHandle, SubscriptionToken,
};
pub use history::{History, HistoryEntry, HistoryOptions};
pub use id::{EmitterId, HandleId, ObserverId};
pub use links::LinkGraph;
pub use observer::{Observer, ObserverCallback, TrackedKey};
pub use registry::{registry, Registry, WrapOutcome};
pub use schema::{Outcome as SchemaOutcome, PredicateSchema, RequiredKeysSchema, Schema, SchemaRef};
pub use tracking::ActiveObserver;
pub use value::{Key, PathKey, ShapeKind, Value};

/// Wrap a value as a reactive handle, or hand it back unchanged if it is not
/// a linkable shape (§4.1 `wrap`).
pub fn wrap(value: Value, config: HandleConfig) -> WrapOutcome {
    registry().wrap(value, config)
}

/// Wrap a value under a validating schema (§4.1 "model" variant).
pub fn wrap_model(schema: SchemaRef, value: Value, config: HandleConfig) -> WrapOutcome {
    registry().wrap_model(schema, value, config)
}

/// Wrap a sequence that keeps itself sorted by `comparator` after every
/// structural mutation (§E "ordered" open question resolution).
pub fn wrap_ordered(items: Vec<Value>, config: HandleConfig, comparator: Comparator) -> WrapOutcome {
    registry().wrap_ordered(items, config, comparator)
}

/// Read the whole value a handle currently holds, recursively resolving any
/// nested handles back into plain `Value`s (§4.1 `snapshot`).
pub fn snapshot(handle: ReactiveHandle) -> Value {
    registry().snapshot(handle)
}

/// Structural membership test across every live handle (§4.1 `has`).
pub fn has(value: &Value) -> bool {
    registry().has(value)
}

/// Find the handle already wrapping a structurally-equal value, if any
/// (§4.1 `find`).
pub fn find(value: &Value) -> Option<ReactiveHandle> {
    registry().find(value)
}

/// Merge `patch` into a record/map handle as a single batched event (§4.1
/// `assign`).
pub fn assign(handle: ReactiveHandle, patch: Vec<(String, Value)>) -> Result<()> {
    registry().assign(handle, patch)
}

/// Delete every key in `keys` from a record/map handle as a single batched
/// event (§4.1 `remove`).
pub fn remove(handle: ReactiveHandle, keys: Vec<Key>) -> Result<()> {
    registry().remove(handle, keys)
}

/// Empty a record/map/sequence/set handle (§4.1 `clear`).
pub fn clear(handle: ReactiveHandle) -> Result<()> {
    registry().clear(handle)
}

/// Tear down a handle and, transitively, every child no longer reachable
/// from any other live handle (§4.4). Returns `false` without destroying
/// anything if the handle still has external subscribers and `force` is
/// not set.
pub fn destroy(handle: ReactiveHandle, force: bool) -> bool {
    registry().destroy(handle, force)
}

/// Subscribe to every `StateChange` a handle (or its descendants) broadcasts
/// (§4.2 `subscribe`).
pub fn subscribe(handle: ReactiveHandle, callback: ChangeCallback) -> SubscriptionToken {
    registry().subscribe(handle, callback)
}

/// Cancel a subscription returned by [`subscribe`] or [`derive_fn`].
pub fn unsubscribe(token: SubscriptionToken) {
    registry().unsubscribe(token)
}

/// Register a callback invoked whenever a mutation on `handle` raises a
/// validation error or a schema rejection (§7 "Propagation").
pub fn catch(handle: ReactiveHandle, f: ExceptionCallback) -> u64 {
    registry().catch(handle, f)
}

pub fn uncatch(handle: ReactiveHandle, token: u64) {
    registry().uncatch(handle, token)
}

/// Patch a handle's live [`HandleConfig`] in place (§4.1 `configure`).
pub fn configure(handle: ReactiveHandle, f: impl FnOnce(&mut HandleConfig)) {
    registry().configure(handle, f)
}

/// Snapshot every live handle's configuration (§6 `configs`).
pub fn configs() -> Vec<(HandleId, HandleConfig)> {
    registry().configs()
}

/// Build a fresh [`Observer`] that tracks whatever `(handle, key)` pairs its
/// `run` reads (§4.5 `createObserver`).
pub fn create_observer(
    name: Option<String>,
    on_change: ObserverCallback,
) -> std::sync::Arc<Observer> {
    Observer::new(name, on_change)
}

/// Start recording `handle`'s mutation history for undo/redo (§4.7
/// `history`).
pub fn history(handle: ReactiveHandle, options: HistoryOptions) -> std::sync::Arc<History> {
    History::record_with_options(handle, options)
}

/// Run `body` while recording `handle`'s mutations, returning a closure that
/// reverses them in order (§6 `undoable`).
pub fn undoable(handle: ReactiveHandle, body: impl FnOnce()) -> impl Fn() -> Result<()> {
    history::undoable(handle, body)
}
