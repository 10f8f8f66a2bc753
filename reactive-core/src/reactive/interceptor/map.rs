//! Keyed-map interception (§4.3 "Keyed-map").
//!
//! Behaves like `record` but keyed by the broader [`Key`] type rather than a
//! bare string, matching the source crate's `Map<K, V>` surface.

use crate::reactive::error::Result;
use crate::reactive::handle::ReactiveHandle;
use crate::reactive::observer::TrackedKey;
use crate::reactive::registry::registry;
use crate::reactive::tracking::ActiveObserver;
use crate::reactive::value::{Key, Value};

pub fn get(handle: ReactiveHandle, key: &Key, silent: bool) -> Value {
    let reg = registry();
    if !silent && reg.config_of(handle.id).map(|c| c.observable).unwrap_or(true) {
        ActiveObserver::record_read(handle.id, TrackedKey::Key(key.clone()));
    }
    match reg.snapshot(handle) {
        Value::Map(map) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

pub fn has(handle: ReactiveHandle, key: &Key) -> bool {
    matches!(registry().snapshot(handle), Value::Map(m) if m.contains_key(key))
}

pub fn set(handle: ReactiveHandle, key: Key, value: Value) -> Result<()> {
    registry().map_set(handle, key, value)
}

pub fn delete(handle: ReactiveHandle, key: Key) -> Result<()> {
    registry().map_delete(handle, key)
}

pub fn clear(handle: ReactiveHandle) -> Result<()> {
    registry().clear(handle)
}

pub fn size(handle: ReactiveHandle) -> usize {
    match registry().snapshot(handle) {
        Value::Map(m) => m.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::handle::HandleConfig;
    use indexmap::IndexMap;

    fn map(pairs: &[(Key, Value)]) -> Value {
        Value::Map(pairs.iter().cloned().collect::<IndexMap<_, _>>())
    }

    #[test]
    fn set_get_delete_round_trip() {
        let handle = registry()
            .wrap(map(&[(Key::from("a"), Value::from(1i64))]), HandleConfig::default())
            .handle()
            .unwrap();
        assert_eq!(get(handle, &Key::from("a"), true), Value::from(1i64));
        set(handle, Key::from("b"), Value::from(2i64)).unwrap();
        assert_eq!(size(handle), 2);
        delete(handle, Key::from("a")).unwrap();
        assert!(!has(handle, &Key::from("a")));
    }

    #[test]
    fn clear_empties_the_map() {
        let handle = registry()
            .wrap(
                map(&[(Key::from("a"), Value::from(1i64)), (Key::from("b"), Value::from(2i64))]),
                HandleConfig::default(),
            )
            .handle()
            .unwrap();
        clear(handle).unwrap();
        assert_eq!(size(handle), 0);
    }
}
