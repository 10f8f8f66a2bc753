//! Set interception (§4.3 "Set").
//!
//! Sets only ever hold scalar [`Key`]s (see `Value::Set`'s definition), so
//! there is no nested-child bookkeeping here — `add`/`delete` are pure
//! membership operations and `clear` is generic over every linkable shape
//! (handled by [`Registry::clear`]).

use crate::reactive::error::Result;
use crate::reactive::handle::ReactiveHandle;
use crate::reactive::observer::TrackedKey;
use crate::reactive::registry::registry;
use crate::reactive::tracking::ActiveObserver;
use crate::reactive::value::{Key, Value};

pub fn has(handle: ReactiveHandle, item: &Key, silent: bool) -> bool {
    let reg = registry();
    if !silent && reg.config_of(handle.id).map(|c| c.observable).unwrap_or(true) {
        ActiveObserver::record_read(handle.id, TrackedKey::CollectionMutations);
    }
    matches!(reg.snapshot(handle), Value::Set(s) if s.contains(item))
}

pub fn add(handle: ReactiveHandle, item: Key) -> Result<()> {
    registry().set_add(handle, item)
}

pub fn delete(handle: ReactiveHandle, item: Key) -> Result<()> {
    registry().set_delete(handle, item)
}

pub fn clear(handle: ReactiveHandle) -> Result<()> {
    registry().clear(handle)
}

pub fn size(handle: ReactiveHandle) -> usize {
    match registry().snapshot(handle) {
        Value::Set(s) => s.len(),
        _ => 0,
    }
}
