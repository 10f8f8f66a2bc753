//! Cross-module scenarios for the reactive engine: a handle is wrapped,
//! mutated through its interceptors, and observed end to end through the
//! registry, broadcaster, derivation, and history layers rather than any
//! one module in isolation.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use reactive_core::reactive::history::HistoryOptions;
use reactive_core::reactive::interceptor::{map, record, sequence, set as set_ops};
use reactive_core::reactive::registry::{registry, WrapOutcome};
use reactive_core::reactive::value::Key;
use reactive_core::reactive::{derive_fn, history, undoable, wrap, HandleConfig, ReactiveError, ReactiveHandle, ShapeKind, Value};

fn record_of(pairs: &[(&str, Value)]) -> Value {
    Value::Record(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

fn wrap_handle(value: Value, config: HandleConfig) -> ReactiveHandle {
    match wrap(value, config) {
        WrapOutcome::Wrapped(handle) => handle,
        WrapOutcome::Unchanged(_) => panic!("expected a linkable value"),
    }
}

/// A plain counter: wrap a record, subscribe, mutate a field, observe one
/// notification carrying the new value.
#[test]
fn counter_set_notifies_subscribers_with_the_new_value() {
    let counter = wrap_handle(record_of(&[("count", Value::from(0i64))]), HandleConfig::default());

    let seen = Arc::new(AtomicI64::new(-1));
    let seen_clone = seen.clone();
    registry().subscribe(
        counter,
        Arc::new(move |change| {
            if let Value::Number(n) = &change.value {
                seen_clone.store(*n as i64, Ordering::SeqCst);
            }
        }),
    );

    record::set(counter, "count", Value::from(1i64)).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(record::get(counter, "count", true), Value::from(1i64));
}

/// A mutation on a nested record is relayed up through the parent's
/// subscription, with the child's key lifted onto the event's key path.
#[test]
fn nested_record_write_lifts_the_child_key_onto_the_parent_event() {
    let mut inner = IndexMap::new();
    inner.insert("name".to_string(), Value::from("alice"));
    let parent = wrap_handle(record_of(&[("user", Value::Record(inner))]), HandleConfig::default());

    let lifted_keys = Arc::new(std::sync::Mutex::new(Vec::new()));
    let lifted_clone = lifted_keys.clone();
    registry().subscribe(
        parent,
        Arc::new(move |change| {
            lifted_clone.lock().unwrap().push(change.keys.clone());
        }),
    );

    let user_id = registry()
        .links()
        .child_at(parent.id, &Key::Str("user".into()))
        .expect("nested record should be linked under the 'user' key");
    let user = ReactiveHandle::new(user_id, ShapeKind::Record);
    record::set(user, "name", Value::from("bob")).unwrap();

    let captured = lifted_keys.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0], vec![Key::Str("user".into()), Key::Str("name".into())]);
}

/// Splicing a sequence relinks displaced nested records at their new
/// indices and fires exactly one structural event.
#[test]
fn sequence_splice_relinks_and_fires_one_event() {
    let mut first = IndexMap::new();
    first.insert("n".to_string(), Value::from(1i64));
    let seq = wrap_handle(
        Value::Sequence(vec![Value::Record(first), Value::from(2i64), Value::from(3i64)]),
        HandleConfig::default(),
    );

    let events = Arc::new(AtomicUsize::new(0));
    let events_clone = events.clone();
    registry().subscribe(
        seq,
        Arc::new(move |_| {
            events_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );

    sequence::splice(seq, 0, 1, vec![Value::from(9i64)]).unwrap();

    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert_eq!(sequence::len(seq), 3);
    assert_eq!(sequence::get(seq, 0, true), Value::from(9i64));
}

/// A keyed-map and a set both support their own mutation surface alongside
/// the shared `clear` path.
#[test]
fn map_and_set_mutations_round_trip() {
    let map_handle = wrap_handle(Value::Map(IndexMap::new()), HandleConfig::default());
    map::set(map_handle, Key::Str("a".into()), Value::from(1i64)).unwrap();
    assert!(map::has(map_handle, &Key::Str("a".into())));
    map::delete(map_handle, Key::Str("a".into())).unwrap();
    assert!(!map::has(map_handle, &Key::Str("a".into())));

    let set_handle = wrap_handle(Value::Set(Default::default()), HandleConfig::default());
    set_ops::add(set_handle, Key::Str("x".into())).unwrap();
    assert!(set_ops::has(set_handle, &Key::Str("x".into()), true));
    set_ops::clear(set_handle).unwrap();
    assert_eq!(set_ops::size(set_handle), 0);
}

/// A handle reachable only as a sequence element still reports the
/// sequence's parent handle through the relational graph, so destroying the
/// sequence tears down the nested record too once no other parent holds it.
#[test]
fn destroying_a_sequence_tears_down_unreachable_children() {
    let mut nested = IndexMap::new();
    nested.insert("v".to_string(), Value::from(1i64));
    let seq = wrap_handle(Value::Sequence(vec![Value::Record(nested)]), HandleConfig::default());

    let child_id = registry()
        .links()
        .child_at(seq.id, &Key::Int(0))
        .expect("nested record should be linked at index 0");
    assert!(registry().shape_of(child_id).is_some());

    let destroyed = reactive_core::reactive::destroy(seq, false);
    assert!(destroyed);
    assert!(registry().shape_of(child_id).is_none());
}

/// Writing to an immutable handle is refused and reported through the
/// error taxonomy rather than panicking or silently succeeding.
#[test]
fn immutable_handle_refuses_writes() {
    let handle = wrap_handle(record_of(&[("a", Value::from(1i64))]), HandleConfig::immutable());
    let err = record::set(handle, "a", Value::from(2i64)).unwrap_err();
    assert!(matches!(err, ReactiveError::Violation { .. }));
    assert_eq!(record::get(handle, "a", true), Value::from(1i64));
}

/// `derive` runs its callback once synchronously against an `init` event,
/// then again on every subsequent real change.
#[test]
fn derive_runs_once_on_init_then_on_every_change() {
    let handle = wrap_handle(record_of(&[("count", Value::from(0i64))]), HandleConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();
    let _token = derive_fn(
        handle,
        Arc::new(move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        }),
        true,
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    record::set(handle, "count", Value::from(1i64)).unwrap();
    record::set(handle, "count", Value::from(2i64)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// A debounced history recorder merges a burst of same-key writes into one
/// undo step, and `undo`/`redo` walk that merged entry's inverse.
#[test]
fn history_debounces_a_burst_then_undo_redo_restores_each_side() {
    let handle = wrap_handle(record_of(&[("text", Value::from("a"))]), HandleConfig::default());
    let recorder = history(
        handle,
        HistoryOptions {
            debounce: Duration::from_millis(50),
            max_history: 100,
            resettable: false,
        },
    );

    record::set(handle, "text", Value::from("ab")).unwrap();
    record::set(handle, "text", Value::from("abc")).unwrap();
    recorder.flush_pending();

    assert_eq!(recorder.backward_len(), 1);
    assert!(recorder.undo().unwrap());
    assert_eq!(record::get(handle, "text", true), Value::from("a"));
    assert!(recorder.can_forward());

    assert!(recorder.redo().unwrap());
    assert_eq!(record::get(handle, "text", true), Value::from("abc"));
}

/// `undoable` captures every mutation `body` performs and returns a closure
/// that reverses them in the opposite order they were applied.
#[test]
fn undoable_reverses_a_batch_of_operations_in_order() {
    let handle = wrap_handle(Value::Sequence(vec![Value::from(1i64), Value::from(2i64)]), HandleConfig::default());

    let undo = undoable(handle, || {
        sequence::push(handle, vec![Value::from(3i64)]).unwrap();
        sequence::pop(handle).unwrap();
        sequence::push(handle, vec![Value::from(4i64)]).unwrap();
    });

    assert_eq!(
        registry().snapshot(handle),
        Value::Sequence(vec![Value::from(1i64), Value::from(2i64), Value::from(4i64)])
    );

    undo().unwrap();

    assert_eq!(
        registry().snapshot(handle),
        Value::Sequence(vec![Value::from(1i64), Value::from(2i64)])
    );
}
