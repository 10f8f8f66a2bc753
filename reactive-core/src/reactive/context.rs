//! Context frames (§4.8, L9).
//!
//! A scoped key→value store, independent of the handle registry: `activate`
//! pushes a frame and returns a restore guard; `set`/`get` always act on the
//! innermost active frame; outside any frame both diagnose and fall back
//! (`get` to the caller's fallback, `set` to a no-op). Frames nest by saving
//! the previous top on push and restoring it on `Drop`, the same RAII shape
//! as [`super::tracking::ActiveObserver`].
//!
//! Default scoping is a single process-global stack per thread (§9
//! "single-threaded cooperative host"). Hosts that want a different scoping
//! strategy swap in a [`ContextStore`] before the first frame is activated.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use super::diagnostics;
use super::error::ReactiveError;
use super::value::Value;

/// One pushed frame: an owned key→value map.
#[derive(Debug, Default, Clone)]
pub struct ContextFrame {
    values: HashMap<String, Value>,
}

impl ContextFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

/// Pluggable scoping strategy (§9 "Global context store"). The default
/// [`LocalStack`] keeps one stack per OS thread, matching a single-threaded
/// cooperative host; a multi-threaded host can supply its own store giving
/// each thread or task its own frames.
pub trait ContextStore: Send + Sync {
    fn push(&self, frame: ContextFrame);
    fn pop(&self);
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn is_active(&self) -> bool;
}

thread_local! {
    static STACK: RefCell<Vec<ContextFrame>> = RefCell::new(Vec::new());
}

/// The default [`ContextStore`]: one stack per OS thread.
pub struct LocalStack;

impl ContextStore for LocalStack {
    fn push(&self, frame: ContextFrame) {
        STACK.with(|s| s.borrow_mut().push(frame));
    }

    fn pop(&self) {
        STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }

    fn get(&self, key: &str) -> Option<Value> {
        STACK.with(|s| s.borrow().last().and_then(|frame| frame.values.get(key).cloned()))
    }

    fn set(&self, key: &str, value: Value) {
        STACK.with(|s| {
            if let Some(frame) = s.borrow_mut().last_mut() {
                frame.values.insert(key.to_string(), value);
            }
        });
    }

    fn is_active(&self) -> bool {
        STACK.with(|s| !s.borrow().is_empty())
    }
}

static STORE: OnceLock<Arc<dyn ContextStore>> = OnceLock::new();

/// Swap the active [`ContextStore`] (`setContextStore`, §6). Must be called
/// before any `activateContext`/`setContext`/`getContext`; later calls are
/// ignored with a diagnostic, since frames already pushed against the old
/// store would become unreachable.
pub fn set_context_store(store: Arc<dyn ContextStore>) {
    if STORE.set(store).is_err() {
        diagnostics::capture(&ReactiveError::Argument {
            message: "context store already initialized; setContextStore ignored".into(),
        });
    }
}

fn store() -> &'static Arc<dyn ContextStore> {
    STORE.get_or_init(|| Arc::new(LocalStack))
}

/// A live activation, restoring the enclosing frame (or no frame) on drop.
/// The return value of `activateContext`/`createContext`/`withContext` (§6).
pub struct ContextGuard {
    _private: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        store().pop();
    }
}

/// `activateContext(ctx)` (§6): push `frame`, returning a guard that
/// restores the previous frame (or the absence of one) when dropped. Frames
/// nest freely.
pub fn activate_context(frame: ContextFrame) -> ContextGuard {
    store().push(frame);
    ContextGuard { _private: () }
}

/// `createContext()` / `withContext` (§6): push a fresh empty frame.
pub fn create_context() -> ContextGuard {
    activate_context(ContextFrame::new())
}

/// `getContext(key, fallback?)` (§6). Outside any frame, or if `key` is
/// absent from the active frame, logs a diagnostic and returns `fallback`.
pub fn get_context(key: &str, fallback: Option<Value>) -> Value {
    if !store().is_active() {
        diagnostics::capture(&ReactiveError::Argument {
            message: format!("getContext({key}) called outside any active context frame"),
        });
        return fallback.unwrap_or(Value::Null);
    }
    store().get(key).unwrap_or_else(|| fallback.unwrap_or(Value::Null))
}

/// `setContext(key, value)` (§6). Outside any frame this is a diagnosed
/// no-op — there is nowhere to store the value.
pub fn set_context(key: &str, value: Value) {
    if !store().is_active() {
        diagnostics::capture(&ReactiveError::Argument {
            message: format!("setContext({key}) called outside any active context frame"),
        });
        return;
    }
    store().set(key, value);
}

pub fn is_context_active() -> bool {
    store().is_active()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip_inside_a_frame() {
        let _guard = create_context();
        set_context("theme", Value::from("dark"));
        assert_eq!(get_context("theme", None), Value::from("dark"));
    }

    #[test]
    fn get_outside_any_frame_returns_fallback() {
        assert_eq!(get_context("missing-key-never-set", Some(Value::from(7i64))), Value::from(7i64));
    }

    #[test]
    fn nested_frames_shadow_and_restore_on_drop() {
        let _outer = create_context();
        set_context("scope", Value::from("outer"));
        {
            let _inner = create_context();
            set_context("scope", Value::from("inner"));
            assert_eq!(get_context("scope", None), Value::from("inner"));
        }
        assert_eq!(get_context("scope", None), Value::from("outer"));
    }

    #[test]
    fn inner_frame_does_not_see_outer_keys() {
        let _outer = create_context();
        set_context("only_outer", Value::from(1i64));
        let _inner = create_context();
        assert_eq!(get_context("only_outer", Some(Value::from(0i64))), Value::from(0i64));
    }
}
