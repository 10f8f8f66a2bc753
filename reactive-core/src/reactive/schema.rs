//! Schema integration (§4.6, §6, §9 "Schema integration").
//!
//! The core depends on nothing more than a predicate: "any object with a
//! `parse(value) -> {success, error?, issues?}` contract may be supplied".
//! Concrete schema libraries are external; this module defines the trait
//! plus two small adaptors used by the `model` factory variant's tests so
//! that behaviour can be exercised without reaching for a real schema crate.

use std::sync::Arc;

use super::value::Value;

/// Result of validating a candidate write against a schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    pub success: bool,
    pub error: Option<String>,
    pub issues: Vec<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            issues: Vec::new(),
        }
    }

    pub fn reject(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            issues: Vec::new(),
        }
    }

    pub fn reject_with_issues(error: impl Into<String>, issues: Vec<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            issues,
        }
    }
}

/// A pluggable validation predicate. Implementors only need to inspect the
/// candidate value and report success/failure — the engine handles wiring
/// the outcome into the `StateChange`'s `error`/`issues` fields (§4.3, §7).
pub trait Schema: Send + Sync {
    fn parse(&self, value: &Value) -> Outcome;
}

pub type SchemaRef = Arc<dyn Schema>;

/// Wraps a plain closure as a [`Schema`].
pub struct PredicateSchema<F>(F)
where
    F: Fn(&Value) -> bool + Send + Sync;

impl<F> PredicateSchema<F>
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self(predicate)
    }
}

impl<F> Schema for PredicateSchema<F>
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn parse(&self, value: &Value) -> Outcome {
        if (self.0)(value) {
            Outcome::ok()
        } else {
            Outcome::reject("predicate rejected value")
        }
    }
}

/// Rejects any record missing one of a fixed set of keys. A minimal
/// stand-in for the kind of structural schema a real validation crate would
/// provide.
pub struct RequiredKeysSchema {
    pub keys: Vec<String>,
}

impl RequiredKeysSchema {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Schema for RequiredKeysSchema {
    fn parse(&self, value: &Value) -> Outcome {
        let record = match value.as_record() {
            Some(r) => r,
            None => return Outcome::reject("expected a record"),
        };
        let missing: Vec<String> = self
            .keys
            .iter()
            .filter(|k| !record.contains_key(k.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Outcome::ok()
        } else {
            Outcome::reject_with_issues("missing required keys", missing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn predicate_schema_accepts_and_rejects() {
        let schema = PredicateSchema::new(|v| matches!(v, Value::Number(n) if *n >= 0.0));
        assert!(schema.parse(&Value::Number(1.0)).success);
        assert!(!schema.parse(&Value::Number(-1.0)).success);
    }

    #[test]
    fn required_keys_schema_reports_missing_issues() {
        let schema = RequiredKeysSchema::new(["name", "age"]);
        let mut record = IndexMap::new();
        record.insert("name".to_string(), Value::from("Jordan"));
        let outcome = schema.parse(&Value::Record(record));
        assert!(!outcome.success);
        assert_eq!(outcome.issues, vec!["age".to_string()]);
    }
}
