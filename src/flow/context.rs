//! Per-run context accumulator.
//!
//! Each flow run owns exactly one [`ContextStore`]. Completed steps merge
//! their output into it, and later steps see the accumulated values through
//! an immutable [`ContextSnapshot`]. Keys are strings, values are arbitrary
//! JSON; later writes to the same key win.

use serde_json::{Map, Value};

/// Immutable view of the context at a point in time, handed to guards and
/// capability invocations.
pub type ContextSnapshot = Map<String, Value>;

/// Append-only key/value accumulator scoped to one flow run.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    values: Map<String, Value>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fresh store with the caller's initial input.
    pub fn from_initial(initial: Map<String, Value>) -> Self {
        Self { values: initial }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Fetch a value, falling back to `default` when the key is absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.values.get(key).unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Apply multiple `set`s in the iteration order of the input mapping.
    pub fn merge(&mut self, mapping: Map<String, Value>) {
        for (key, value) in mapping {
            self.values.insert(key, value);
        }
    }

    /// Immutable copy for guard evaluation or capability invocation.
    pub fn snapshot(&self) -> ContextSnapshot {
        self.values.clone()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
