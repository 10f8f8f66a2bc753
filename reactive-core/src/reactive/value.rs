//! The dynamic value model.
//!
//! §3 describes four "linkable" shape families — record, sequence, keyed-map,
//! set — each holding arbitrary nested values. Rust has no runtime-reflected
//! object type, so rather than generating one `Signal<T>` per concrete Rust
//! type (as a single-value reactive primitive would), the interceptor layer
//! (§4.3) operates over this crate's own small dynamic value tree, `Value`.
//! Each shape family is a variant; nested linkable values that have already
//! been registered with the [`Registry`](super::registry::Registry) are
//! represented as [`Value::Handle`], a non-owning reference by id — this is
//! how cyclic graphs stay representable without a child ever owning its
//! parent (§9).
//!
//! This is a tagged-variant design: there is no proxy, no runtime
//! reflection, just an explicit enum and typed accessors.

use std::collections::HashSet;
use std::fmt;

use indexmap::{IndexMap, IndexSet};

use super::id::HandleId;

/// A key usable in a keyed-map or set. Restricted to hashable primitives —
/// floating point keys are not supported, matching how most reactive state
/// containers in practice only ever key by string/int/bool (see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s}"),
            Key::Int(i) => write!(f, "{i}"),
            Key::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

/// A segment of a [`StateChange`](super::change::StateChange) key path
/// (§3: "keys: ordered sequence of segment keys from the root to the mutated
/// location").
pub type PathKey = Key;

/// The shape family a [`Value`] belongs to. Mirrors §2's four linkable
/// families plus the non-linkable scalar leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Record,
    Sequence,
    Map,
    Set,
    Scalar,
}

/// The dynamic value tree wrapped by the reactive engine.
///
/// `Value::Handle` is how the reactive transitive closure (§3 invariant 5) is
/// represented: once a nested record/sequence/map/set is wrapped, its slot
/// holds a reference to the child's id rather than an owned copy, so reads
/// resolve through the registry and mutations of the child are visible from
/// every place that reached it.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Record(IndexMap<String, Value>),
    Sequence(Vec<Value>),
    Map(IndexMap<Key, Value>),
    Set(IndexSet<Key>),
    /// A reference to another registered reactive handle (cycle-safe, §3
    /// invariant 7; transitive closure, §3 invariant 5).
    Handle(HandleId),
}

impl Value {
    pub fn shape_kind(&self) -> ShapeKind {
        match self {
            Value::Record(_) => ShapeKind::Record,
            Value::Sequence(_) => ShapeKind::Sequence,
            Value::Map(_) => ShapeKind::Map,
            Value::Set(_) => ShapeKind::Set,
            _ => ShapeKind::Scalar,
        }
    }

    /// Whether this value is one of the four linkable shape families (§4.1:
    /// "If the value is not one of the four shape families, return it
    /// unchanged").
    pub fn is_linkable(&self) -> bool {
        !matches!(self.shape_kind(), ShapeKind::Scalar)
    }

    pub fn is_handle(&self) -> bool {
        matches!(self, Value::Handle(_))
    }

    pub fn as_handle(&self) -> Option<HandleId> {
        match self {
            Value::Handle(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Record(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Sequence(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Sequence(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<Key, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut IndexMap<Key, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&IndexSet<Key>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut IndexSet<Key>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Every handle id directly referenced by this value (one level deep —
    /// used by the relational graph to find children to link/unlink).
    pub fn direct_handle_refs(&self) -> HashSet<HandleId> {
        let mut out = HashSet::new();
        match self {
            Value::Handle(id) => {
                out.insert(*id);
            }
            Value::Record(m) => {
                for v in m.values() {
                    if let Value::Handle(id) = v {
                        out.insert(*id);
                    }
                }
            }
            Value::Sequence(v) => {
                for item in v {
                    if let Value::Handle(id) = item {
                        out.insert(*id);
                    }
                }
            }
            Value::Map(m) => {
                for v in m.values() {
                    if let Value::Handle(id) = v {
                        out.insert(*id);
                    }
                }
            }
            _ => {}
        }
        out
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Handle(a), Value::Handle(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Convert a JSON tree into a `Value`, for hosts that hand the engine a
/// snapshot to rehydrate (§6 persisted state layout) or a schema's rejected
/// payload. Nested objects/arrays become `Record`/`Sequence`; this never
/// produces a `Map`, `Set` or `Handle` since JSON has no such concepts — use
/// [`Registry::wrap`](super::registry::Registry::wrap) afterwards to turn
/// nested records/sequences into linked children.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Sequence(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Record(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Convert a `Value` back into JSON, for hosts that want to persist or ship
/// a snapshot (§6 persisted state layout). `Map` becomes a JSON object keyed
/// by each key's `Display` form; `Set` becomes a JSON array of its members;
/// `Handle` should never reach here once a value has passed through
/// [`Registry::snapshot`](super::registry::Registry::snapshot), which
/// resolves every nested handle, but is rendered as `null` rather than
/// panicking if it does.
impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Record(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.into())).collect())
            }
            Value::Sequence(items) => serde_json::Value::Array(items.iter().map(|v| v.into()).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.to_string(), v.into())).collect(),
            ),
            Value::Set(set) => {
                serde_json::Value::Array(set.iter().map(|k| serde_json::Value::from(key_to_value(k))).collect())
            }
            Value::Handle(_) => serde_json::Value::Null,
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        (&value).into()
    }
}

fn key_to_value(key: &Key) -> Value {
    match key {
        Key::Str(s) => Value::String(s.clone()),
        Key::Int(i) => Value::Number(*i as f64),
        Key::Bool(b) => Value::Bool(*b),
    }
}

/// `Value::to_json` / `Value::from_json` (§6 snapshot serialization): thin
/// wrappers so callers don't need to name `serde_json::Value` or handle
/// parse errors by hand.
impl Value {
    pub fn to_json(&self) -> serde_json::Value {
        self.into()
    }

    pub fn from_json_str(text: &str) -> serde_json::Result<Value> {
        serde_json::from_str::<serde_json::Value>(text).map(Value::from)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkable_shapes() {
        assert!(Value::Record(IndexMap::new()).is_linkable());
        assert!(Value::Sequence(Vec::new()).is_linkable());
        assert!(Value::Map(IndexMap::new()).is_linkable());
        assert!(Value::Set(IndexSet::new()).is_linkable());
        assert!(!Value::Number(1.0).is_linkable());
        assert!(!Value::Null.is_linkable());
    }

    #[test]
    fn equal_values_suppress_write() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Number(1.0), Value::Number(2.0));
        assert_ne!(Value::Number(1.0), Value::String("1".into()));
    }

    #[test]
    fn direct_handle_refs_collects_nested_handles() {
        let mut record = IndexMap::new();
        record.insert("child".to_string(), Value::Handle(HandleId::new()));
        record.insert("leaf".to_string(), Value::Number(1.0));
        let v = Value::Record(record);
        assert_eq!(v.direct_handle_refs().len(), 1);
    }

    #[test]
    fn json_conversion_nests_records_and_sequences() {
        let json = serde_json::json!({"a": 1, "b": [1, 2, {"c": true}]});
        let v = Value::from(json);
        match v {
            Value::Record(m) => {
                assert_eq!(m.get("a"), Some(&Value::Number(1.0)));
                match m.get("b") {
                    Some(Value::Sequence(seq)) => assert_eq!(seq.len(), 3),
                    _ => panic!("expected sequence"),
                }
            }
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn to_json_round_trips_a_record_snapshot() {
        let json = serde_json::json!({"a": 1, "b": [1, 2], "c": "x"});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn from_json_str_parses_and_converts() {
        let value = Value::from_json_str(r#"{"n": 42}"#).unwrap();
        match value {
            Value::Record(m) => assert_eq!(m.get("n"), Some(&Value::Number(42.0))),
            _ => panic!("expected record"),
        }
    }
}
