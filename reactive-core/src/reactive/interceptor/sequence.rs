//! Sequence interception (§4.3 "Sequence").
//!
//! Index reads track `Key(Int(i))`; every mutating method (`push`, `pop`,
//! `shift`, `unshift`, `splice`, `sort`, `reverse`, `fill`, `copyWithin`)
//! touches the `ArrayMutations` sentinel instead of a specific index, since
//! a structural change can shift every element after the touched point.

use crate::reactive::error::Result;
use crate::reactive::handle::ReactiveHandle;
use crate::reactive::observer::TrackedKey;
use crate::reactive::registry::registry;
use crate::reactive::tracking::ActiveObserver;
use crate::reactive::value::{Key, Value};

pub fn get(handle: ReactiveHandle, index: usize, silent: bool) -> Value {
    let reg = registry();
    if !silent && reg.config_of(handle.id).map(|c| c.observable).unwrap_or(true) {
        ActiveObserver::record_read(handle.id, TrackedKey::Key(Key::Int(index as i64)));
    }
    match reg.snapshot(handle) {
        Value::Sequence(seq) => seq.get(index).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

pub fn len(handle: ReactiveHandle) -> usize {
    match registry().snapshot(handle) {
        Value::Sequence(seq) => seq.len(),
        _ => 0,
    }
}

pub fn push(handle: ReactiveHandle, items: Vec<Value>) -> Result<()> {
    registry().sequence_push(handle, items)
}

pub fn pop(handle: ReactiveHandle) -> Result<Value> {
    registry().sequence_pop(handle)
}

pub fn shift(handle: ReactiveHandle) -> Result<Value> {
    registry().sequence_shift(handle)
}

pub fn unshift(handle: ReactiveHandle, items: Vec<Value>) -> Result<()> {
    registry().sequence_unshift(handle, items)
}

pub fn splice(handle: ReactiveHandle, start: usize, delete_count: usize, items: Vec<Value>) -> Result<()> {
    registry().sequence_splice(handle, start, delete_count, items)
}

pub fn sort(handle: ReactiveHandle, comparator: &dyn Fn(&Value, &Value) -> std::cmp::Ordering) -> Result<()> {
    registry().sequence_sort(handle, comparator)
}

pub fn reverse(handle: ReactiveHandle) -> Result<()> {
    registry().sequence_reverse(handle)
}

pub fn fill(handle: ReactiveHandle, value: Value, start: usize, end: Option<usize>) -> Result<()> {
    registry().sequence_fill(handle, value, start, end)
}

pub fn copy_within(handle: ReactiveHandle, target: usize, start: usize, end: Option<usize>) -> Result<()> {
    registry().sequence_copy_within(handle, target, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::handle::HandleConfig;

    fn seq(items: &[Value]) -> Value {
        Value::Sequence(items.to_vec())
    }

    #[test]
    fn push_pop_round_trip() {
        let handle = registry()
            .wrap(seq(&[Value::from(1i64)]), HandleConfig::default())
            .handle()
            .unwrap();
        push(handle, vec![Value::from(2i64)]).unwrap();
        assert_eq!(len(handle), 2);
        assert_eq!(pop(handle).unwrap(), Value::from(2i64));
        assert_eq!(len(handle), 1);
    }

    #[test]
    fn splice_replaces_a_slice() {
        let handle = registry()
            .wrap(
                seq(&[Value::from(1i64), Value::from(2i64), Value::from(3i64)]),
                HandleConfig::default(),
            )
            .handle()
            .unwrap();
        splice(handle, 1, 1, vec![Value::from(9i64)]).unwrap();
        assert_eq!(
            registry().snapshot(handle),
            Value::Sequence(vec![Value::from(1i64), Value::from(9i64), Value::from(3i64)])
        );
    }

    #[test]
    fn splice_relinks_nested_records_at_new_indices() {
        let mut rec = indexmap::IndexMap::new();
        rec.insert("name".to_string(), Value::from("a"));
        let handle = registry()
            .wrap(seq(&[Value::Record(rec), Value::from(1i64)]), HandleConfig::default())
            .handle()
            .unwrap();
        shift(handle).unwrap();
        assert_eq!(len(handle), 1);
        assert_eq!(get(handle, 0, true), Value::from(1i64));
    }

    #[test]
    fn reverse_flips_order() {
        let handle = registry()
            .wrap(seq(&[Value::from(1i64), Value::from(2i64)]), HandleConfig::default())
            .handle()
            .unwrap();
        reverse(handle).unwrap();
        assert_eq!(
            registry().snapshot(handle),
            Value::Sequence(vec![Value::from(2i64), Value::from(1i64)])
        );
    }
}
