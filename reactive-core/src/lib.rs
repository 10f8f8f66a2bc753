//! Reactive Core
//!
//! This crate provides a framework-agnostic reactive state engine: mutation
//! interception over records, sequences, keyed maps and sets, a handle
//! registry with a parent/child relational graph, a broadcast pipeline, an
//! observer/dependency-tracking core, a derivation layer built on top of it,
//! and a history/undo-redo recorder.
//!
//! The crate is designed to be used both as a native Rust library and as a
//! Python extension module via PyO3.
//!
//! # Architecture
//!
//! Everything lives under [`reactive`]; see that module's doc comment for
//! the submodule breakdown. [`bindings`] is the thin PyO3 surface exposed to
//! the `_core` extension module.

pub mod bindings;
pub mod reactive;

use pyo3::prelude::*;

/// Python module definition.
///
/// This function is called by Python when importing the module. It
/// registers the functions `bindings` exposes.
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(bindings::wrap, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::get, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::set_path, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::subscribe, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
