//! Error taxonomy (§7).
//!
//! Spec.md is explicit that these are *kinds*, not exception types that
//! unwind the call stack: only [`ReactiveError::Contract`] is meant to
//! propagate as a hard `Err` from a public API ("the only case where the
//! core aborts"). Every other kind is constructed, handed to the
//! [diagnostics](super::diagnostics) channel, and the operation either no-ops
//! or leaves the previous state in place — see each variant's doc comment
//! for its surfacing rule.

use thiserror::Error;

use super::id::HandleId;

/// A structured diagnostic produced by the core. Kinds match §7's table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReactiveError {
    /// `wrap` called on a non-linkable value, or a handle was reentrantly
    /// constructed for an already-registered underlying value.
    ///
    /// Surfacing: diagnostic only; the call returns the input verbatim.
    #[error("initialization: {message}")]
    Initialization { message: String },

    /// A public API received an argument of the wrong shape (e.g. `remove`
    /// called with a key that is not present, `splice` with an
    /// out-of-bounds index).
    ///
    /// Surfacing: diagnostic; the operation no-ops.
    #[error("argument: {message}")]
    Argument { message: String },

    /// A schema predicate rejected a write.
    ///
    /// Surfacing: the resulting `StateChange` carries `error`/`issues`;
    /// registered exception handlers are invoked; in `strict` + `production`
    /// configuration this is elevated to a terminal error by the
    /// broadcaster (§4.2 "Error path").
    #[error("validation failed on {handle} at {path}: {message}")]
    Validation {
        handle: HandleId,
        path: String,
        message: String,
        issues: Vec<String>,
    },

    /// A write or mutating method was attempted on an immutable, read-only,
    /// or destroyed handle.
    ///
    /// Surfacing: diagnostic; no state change.
    #[error("violation on {handle}: {message}")]
    Violation { handle: HandleId, message: String },

    /// Caller used an interceptor-level API directly on a value that was
    /// never registered as a reactive handle.
    ///
    /// Surfacing: terminal — this is the one kind the core returns as an
    /// `Err` rather than swallowing.
    #[error("contract violation: {message}")]
    Contract { message: String },

    /// A host-supplied callback (subscriber, observer, transform, dev-tool
    /// hook) raised while running.
    ///
    /// Surfacing: captured and logged; does not interrupt sibling
    /// subscribers/observers (§7 "Propagation").
    #[error("external callback error: {message}")]
    External { message: String },
}

impl ReactiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReactiveError::Initialization { .. } => ErrorKind::Initialization,
            ReactiveError::Argument { .. } => ErrorKind::Argument,
            ReactiveError::Validation { .. } => ErrorKind::Validation,
            ReactiveError::Violation { .. } => ErrorKind::Violation,
            ReactiveError::Contract { .. } => ErrorKind::Contract,
            ReactiveError::External { .. } => ErrorKind::External,
        }
    }

    /// Whether this kind should ever be elevated to a hard `Err` by the
    /// broadcaster's error path (§4.2): only validation errors under strict
    /// production configuration, and contract violations unconditionally.
    pub fn is_contract(&self) -> bool {
        matches!(self, ReactiveError::Contract { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Initialization,
    Argument,
    Validation,
    Violation,
    Contract,
    External,
}

pub type Result<T> = std::result::Result<T, ReactiveError>;
