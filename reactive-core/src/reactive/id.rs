//! Stable identity for reactive handles.
//!
//! Every reactive handle, observer and historical entry needs an identifier
//! that is stable for its lifetime and cheap to compare. We use a process-wide
//! atomic counter rather than addresses so that ids stay valid across moves
//! and are safe to log, hash, or hand to a host language over FFI.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an entry in the [`Registry`](super::registry::Registry).
///
/// `HandleId` is the non-owning edge type the relational graph and the
/// dependency graph are built from: everything refers to handles by id and
/// looks them up in the registry, never by holding a reference to another
/// handle's internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Reconstruct a `HandleId` from its raw value, e.g. one handed back to
    /// a host over FFI (§A "thin PyO3 extension"). The counter never reuses
    /// values, so a raw id either names a still-registered handle or one
    /// that has been destroyed; it never collides with a live one.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique identifier for an [`Observer`](super::observer::Observer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs#{}", self.0)
    }
}

/// Identifies the emitter of a [`StateChange`](super::change::StateChange) so
/// internal subscribers can recognize and suppress their own echoes (§3
/// invariant 4: "causality without echo").
pub type EmitterId = HandleId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_ids_are_unique_and_ordered() {
        let a = HandleId::new();
        let b = HandleId::new();
        assert_ne!(a, b);
        assert!(a.raw() < b.raw());
    }

    #[test]
    fn observer_ids_are_unique() {
        let o1 = ObserverId::new();
        let o2 = ObserverId::new();
        assert_ne!(o1, o2);
    }
}
