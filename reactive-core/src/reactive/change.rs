//! The `StateChange` event (§3).
//!
//! One `StateChange` is produced per mutation (or per batch, for `assign`/
//! `remove`/`clear`). `value`/`prev` are themselves [`Value`]s so that
//! multi-argument mutations (e.g. `splice`) can carry a whole arguments
//! tuple: `splice(1, 1, 9)` on `[1, 2, 3]` produces `value = [1, 1, 9]` (the
//! call's own `[start, deleteCount, ...items]`), `prev = [2]` (the removed
//! slice). Absent values use `Value::Null` in place of "undefined".

use super::error::ReactiveError;
use super::id::{EmitterId, HandleId};
use super::value::{PathKey, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Init,
    Set,
    Delete,
    Assign,
    Remove,
    Clear,
    Sort,
    Reverse,
    Push,
    Pop,
    Shift,
    Unshift,
    Splice,
    Fill,
    CopyWithin,
    Add,
}

impl ChangeType {
    /// Mutating methods of a sequence (§4.3 "Sequence"): any of these touch
    /// the `ARRAY_MUTATIONS` sentinel rather than a specific index.
    pub fn is_sequence_structural(&self) -> bool {
        matches!(
            self,
            ChangeType::Push
                | ChangeType::Pop
                | ChangeType::Shift
                | ChangeType::Unshift
                | ChangeType::Splice
                | ChangeType::Sort
                | ChangeType::Reverse
                | ChangeType::Fill
                | ChangeType::CopyWithin
        )
    }
}

/// An event describing one reactive mutation.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub change_type: ChangeType,
    /// Ordered segment keys from the root handle to the mutated location
    /// (§3 invariant 3). Empty for set/map clear and whole-collection events
    /// emitted at the handle's own root.
    pub keys: Vec<PathKey>,
    pub value: Value,
    pub prev: Value,
    pub error: Option<ReactiveError>,
    pub issues: Vec<String>,
    /// The metadata id of the handle that produced this event, used to
    /// suppress self-echo when relayed to a parent (§3 invariant 4).
    pub emitter: EmitterId,
}

impl StateChange {
    pub fn new(change_type: ChangeType, emitter: HandleId) -> Self {
        Self {
            change_type,
            keys: Vec::new(),
            value: Value::Null,
            prev: Value::Null,
            error: None,
            issues: Vec::new(),
            emitter,
        }
    }

    pub fn with_keys(mut self, keys: Vec<PathKey>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn with_prev(mut self, prev: Value) -> Self {
        self.prev = prev;
        self
    }

    pub fn with_error(mut self, error: ReactiveError, issues: Vec<String>) -> Self {
        self.error = Some(error);
        self.issues = issues;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Prepend a link key to this event's path and rewrite the emitter,
    /// producing the event a parent relays to its own subscribers (§3
    /// invariant 3, §4.4).
    pub fn lifted(mut self, link_key: PathKey, new_emitter: HandleId) -> Self {
        self.keys.insert(0, link_key);
        self.emitter = new_emitter;
        self
    }

    /// The synthetic event `derive` fires immediately on subscription when
    /// `emit_init` is requested (§4.6).
    pub fn init(emitter: HandleId) -> Self {
        Self::new(ChangeType::Init, emitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifting_prepends_key_and_rewrites_emitter() {
        let child = HandleId::new();
        let parent = HandleId::new();
        let change = StateChange::new(ChangeType::Set, child)
            .with_keys(vec![PathKey::from("name")])
            .with_value(Value::from("K"))
            .with_prev(Value::from("J"));

        let lifted = change.lifted(PathKey::from("user"), parent);
        assert_eq!(
            lifted.keys,
            vec![PathKey::from("user"), PathKey::from("name")]
        );
        assert_eq!(lifted.emitter, parent);
    }

    #[test]
    fn splice_style_value_is_a_sequence() {
        let change = StateChange::new(ChangeType::Splice, HandleId::new())
            .with_value(Value::Sequence(vec![
                Value::Number(1.0),
                Value::Number(1.0),
                Value::Number(9.0),
            ]))
            .with_prev(Value::Sequence(vec![Value::Number(2.0)]));

        assert_eq!(
            change.value,
            Value::Sequence(vec![Value::Number(1.0), Value::Number(1.0), Value::Number(9.0)])
        );
        assert_eq!(change.prev, Value::Sequence(vec![Value::Number(2.0)]));
    }
}
