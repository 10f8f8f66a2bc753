//! Diagnostic capture (§6 `captureStack.*`, §7 "Surfacing").
//!
//! Every non-contract [`ReactiveError`] produced anywhere in the engine is
//! routed through here rather than returned to the caller. `capture` both
//! emits a `tracing` event (so a host can wire up its own subscriber) and
//! records the diagnostic on a small ring buffer that tests and `devtools`
//! consumers can inspect without needing a `tracing` subscriber installed.

use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{event, Level};

use super::error::{ErrorKind, ReactiveError};

const RING_CAPACITY: usize = 256;

/// A captured diagnostic, independent of whatever the host's logging
/// subscriber does with the paired `tracing` event.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
}

fn ring() -> &'static Mutex<Vec<Diagnostic>> {
    static RING: OnceLock<Mutex<Vec<Diagnostic>>> = OnceLock::new();
    RING.get_or_init(|| Mutex::new(Vec::with_capacity(RING_CAPACITY)))
}

/// Record a diagnostic: emit a `tracing` event at the severity appropriate
/// to its kind, and push it onto the in-process ring buffer.
pub fn capture(error: &ReactiveError) {
    let level = match error.kind() {
        ErrorKind::Contract => Level::ERROR,
        ErrorKind::Validation | ErrorKind::Violation => Level::WARN,
        ErrorKind::Initialization | ErrorKind::Argument => Level::WARN,
        ErrorKind::External => Level::ERROR,
    };

    match level {
        Level::ERROR => event!(Level::ERROR, kind = ?error.kind(), "{}", error),
        _ => event!(Level::WARN, kind = ?error.kind(), "{}", error),
    }

    let mut buf = ring().lock();
    if buf.len() == RING_CAPACITY {
        buf.remove(0);
    }
    buf.push(Diagnostic {
        kind: error.kind(),
        message: error.to_string(),
    });
}

/// Drain and return every diagnostic captured since the last drain. Intended
/// for tests and dev-tool consumers, not hot-path logic.
pub fn drain() -> Vec<Diagnostic> {
    std::mem::take(&mut ring().lock())
}

/// Namespace mirroring §6's `captureStack.{error,warning,violation,
/// contractViolation}` surface: convenience constructors that build the
/// matching [`ReactiveError`] and capture it in one call.
pub mod capture_stack {
    use super::*;
    use crate::reactive::id::HandleId;

    pub fn error(message: impl Into<String>) -> ReactiveError {
        let err = ReactiveError::External {
            message: message.into(),
        };
        capture(&err);
        err
    }

    pub fn warning(message: impl Into<String>) -> ReactiveError {
        let err = ReactiveError::Argument {
            message: message.into(),
        };
        capture(&err);
        err
    }

    pub fn violation(handle: HandleId, message: impl Into<String>) -> ReactiveError {
        let err = ReactiveError::Violation {
            handle,
            message: message.into(),
        };
        capture(&err);
        err
    }

    pub fn contract_violation(message: impl Into<String>) -> ReactiveError {
        let err = ReactiveError::Contract {
            message: message.into(),
        };
        capture(&err);
        err
    }
}
