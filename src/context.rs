//! Per-case variable store.
//!
//! The context maps string keys to dynamic JSON values: process environment
//! variables (verbatim), case-level variables, mock metadata such as
//! `<mock>.baseURL`, and response fields extracted under
//! `<stepName>.response.<dotted.path>`. It is created per case, mutated only
//! during that case, and discarded at case end.

use serde_json::Value;
use std::collections::HashMap;

/// The evolving per-case key/value store read by templates and written by
/// extractions.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Seed a context with every process environment variable, verbatim.
    pub fn from_env() -> Self {
        let mut ctx = Self::empty();
        for (key, value) in std::env::vars() {
            ctx.values.insert(key, Value::String(value));
        }
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merge case-level variables; they win over anything already present.
    pub fn merge_variables(&mut self, variables: &HashMap<String, Value>) {
        for (key, value) in variables {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Clone the parent context for one loop iteration and bind the
    /// iteration variables. Iterations never observe each other's writes.
    pub fn loop_iteration(&self, index: usize, item: &Value, var: Option<&str>) -> Self {
        let mut child = self.clone();
        if let Some(var) = var {
            child.insert(var, item.clone());
        }
        child.insert("loopIndex", index as i64);
        child.insert("loopItem", item.clone());
        child
    }

    /// Flatten a JSON document into the context under `prefix`: maps recurse
    /// with `.key`, arrays index as `[i]`, scalar leaves become values.
    pub fn extract_fields(&mut self, prefix: &str, data: &Value) {
        match data {
            Value::Object(map) => {
                for (key, value) in map {
                    self.extract_fields(&format!("{prefix}.{key}"), value);
                }
            }
            Value::Array(items) => {
                for (i, value) in items.iter().enumerate() {
                    self.extract_fields(&format!("{prefix}[{i}]"), value);
                }
            }
            leaf => {
                self.values.insert(prefix.to_string(), leaf.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rewrite a step name so extracted-field keys stay stable: every
/// whitespace character becomes an underscore.
pub fn normalize_step_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}
