//! Thin PyO3 surface over the reactive engine (§A "a thin PyO3 extension
//! exposing `wrap`, `get`, `set_path`, `subscribe`").
//!
//! Values cross the FFI boundary as JSON text rather than as native PyO3
//! conversions: the engine's `Value` has no canonical Python representation
//! (records vs. maps vs. sets all collapse to a dict/list/set on the Python
//! side depending on the embedding host's own wrapper), so pushing the
//! conversion down to JSON keeps this layer small and lets the Python side
//! own its own marshalling policy. Handles cross as their raw `u64` id.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::reactive::handle::HandleConfig;
use crate::reactive::id::HandleId;
use crate::reactive::registry::{registry, WrapOutcome};
use crate::reactive::value::Value;
use crate::reactive::{ReactiveHandle, StateChange};

fn resolve_handle(id: u64) -> PyResult<ReactiveHandle> {
    let handle_id = HandleId::from_raw(id);
    let shape = registry()
        .shape_of(handle_id)
        .ok_or_else(|| PyValueError::new_err(format!("no reactive handle #{id}")))?;
    Ok(ReactiveHandle::new(handle_id, shape))
}

/// Wrap a JSON value as a reactive handle, returning its raw id. Non-object,
/// non-array JSON (a bare number/string/bool/null) is not linkable and is
/// rejected with a `ValueError` rather than silently handed back, since a
/// raw id is the only thing this binding can return.
#[pyfunction]
pub fn wrap(json: &str) -> PyResult<u64> {
    let value = Value::from_json_str(json).map_err(|e| PyValueError::new_err(e.to_string()))?;
    match registry().wrap(value, HandleConfig::default()) {
        WrapOutcome::Wrapped(handle) => Ok(handle.id.raw()),
        WrapOutcome::Unchanged(_) => Err(PyValueError::new_err(
            "wrap: value is not a record, sequence, map, or set",
        )),
    }
}

/// Snapshot a handle's current value as JSON text.
#[pyfunction]
pub fn get(handle_id: u64) -> PyResult<String> {
    let handle = resolve_handle(handle_id)?;
    registry()
        .snapshot(handle)
        .to_json_string()
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

/// Write `json` at the record path described by `path` (a sequence of
/// string field names, walked from the handle's root). Returns a
/// `ValueError` if any intermediate segment does not resolve to a nested
/// record handle.
#[pyfunction]
pub fn set_path(handle_id: u64, path: Vec<String>, json: &str) -> PyResult<()> {
    let handle = resolve_handle(handle_id)?;
    let value = Value::from_json_str(json).map_err(|e| PyValueError::new_err(e.to_string()))?;
    let Some((last, prefix)) = path.split_last() else {
        return Err(PyValueError::new_err("set_path: path must not be empty"));
    };

    let mut current = handle.id;
    for segment in prefix {
        let key = crate::reactive::value::Key::Str(segment.clone());
        current = registry()
            .links()
            .child_at(current, &key)
            .ok_or_else(|| PyValueError::new_err(format!("set_path: no child at '{segment}'")))?;
    }
    let shape = registry()
        .shape_of(current)
        .ok_or_else(|| PyValueError::new_err("set_path: intermediate handle was destroyed"))?;
    let owner = ReactiveHandle::new(current, shape);

    crate::reactive::interceptor::record::set(owner, last, value)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

/// Subscribe a Python callable to every `StateChange` a handle (or its
/// descendants) broadcasts. The callable receives `(change_type: str,
/// keys: list[str], value_json: str, prev_json: str)`. Returns a
/// subscription id suitable only for logging; there is no `unsubscribe`
/// binding yet since no embedding host has needed one (§D Non-goals do not
/// cover this, it is simply unrequested surface).
#[pyfunction]
pub fn subscribe(handle_id: u64, callback: PyObject) -> PyResult<u64> {
    let handle = resolve_handle(handle_id)?;
    let token = registry().subscribe(
        handle,
        std::sync::Arc::new(move |change: &StateChange| {
            Python::with_gil(|py| {
                let keys: Vec<String> = change.keys.iter().map(|k| k.to_string()).collect();
                let value_json = change.value.to_json_string().unwrap_or_else(|_| "null".into());
                let prev_json = change.prev.to_json_string().unwrap_or_else(|_| "null".into());
                let change_type = format!("{:?}", change.change_type).to_lowercase();
                if let Err(err) = callback.call1(py, (change_type, keys, value_json, prev_json)) {
                    err.print(py);
                }
            });
        }),
    );
    Ok(token.id)
}
