//! Record interception (§4.3 "Record").
//!
//! A record behaves like a plain object: reading `key` tracks `Key(key)` on
//! the owning handle; writing replaces the slot (wrapping a fresh linkable
//! value, unlinking/relinking a displaced child) and fires one `set` event
//! scoped to `[key]`. Deleting removes the slot entirely and fires `delete`.

use crate::reactive::error::Result;
use crate::reactive::handle::ReactiveHandle;
use crate::reactive::observer::TrackedKey;
use crate::reactive::registry::registry;
use crate::reactive::tracking::ActiveObserver;
use crate::reactive::value::{PathKey, Value};

/// Read `key` off a record handle, registering a dependency with the active
/// observer (if any) unless the handle was constructed with
/// `observable: false` or the caller asked for a silent read (§4.3 "silent
/// reads").
pub fn get(handle: ReactiveHandle, key: &str, silent: bool) -> Value {
    let reg = registry();
    if !silent && reg.config_of(handle.id).map(|c| c.observable).unwrap_or(true) {
        ActiveObserver::record_read(handle.id, TrackedKey::Key(PathKey::from(key)));
    }
    match reg.snapshot(handle) {
        Value::Record(map) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

pub fn set(handle: ReactiveHandle, key: &str, value: Value) -> Result<()> {
    registry().record_set(handle, key, value)
}

pub fn delete(handle: ReactiveHandle, key: &str) -> Result<()> {
    registry().record_delete(handle, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::handle::HandleConfig;

    fn record(pairs: &[(&str, Value)]) -> Value {
        Value::Record(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn set_then_get_round_trips() {
        let handle = registry()
            .wrap(record(&[("count", Value::from(0i64))]), HandleConfig::default())
            .handle()
            .unwrap();
        set(handle, "count", Value::from(1i64)).unwrap();
        assert_eq!(get(handle, "count", true), Value::from(1i64));
    }

    #[test]
    fn delete_removes_the_key() {
        let handle = registry()
            .wrap(record(&[("a", Value::from(1i64))]), HandleConfig::default())
            .handle()
            .unwrap();
        delete(handle, "a").unwrap();
        assert_eq!(get(handle, "a", true), Value::Null);
        assert!(matches!(registry().snapshot(handle), Value::Record(m) if !m.contains_key("a")));
    }

    #[test]
    fn identical_write_is_suppressed() {
        let handle = registry()
            .wrap(record(&[("a", Value::from(1i64))]), HandleConfig::default())
            .handle()
            .unwrap();
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits_clone = hits.clone();
        registry().subscribe(
            handle,
            std::sync::Arc::new(move |_| {
                hits_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        set(handle, "a", Value::from(1i64)).unwrap();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
