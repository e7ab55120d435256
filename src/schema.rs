//! Minimal JSON-Schema validation.
//!
//! Supports the keyword subset case authors actually use: `type`,
//! `properties`, `required`, `items`, `additionalProperties` (only when
//! explicitly `false`), `enum`, `minimum`, `maximum`, `minLength` and
//! `maxLength`. `pattern` and `format` are accepted and ignored. Errors are
//! collected rather than short-circuited, each carrying a slash-delimited
//! path from the root.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{EngineError, EngineResult, ErrorKind};

/// A JSON Schema for response-body validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSchema {
    #[serde(default, rename = "type")]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, JsonSchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub items: Option<Box<JsonSchema>>,
    #[serde(default)]
    pub additional_properties: Option<bool>,
    #[serde(default, rename = "enum")]
    pub enumeration: Vec<Value>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Accepted for compatibility, not enforced.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Accepted for compatibility, not enforced.
    #[serde(default)]
    pub format: Option<String>,
}

/// One violation with its location in the validated document.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "$" } else { &self.path };
        write!(f, "validation error at {path}: {}", self.message)
    }
}

impl JsonSchema {
    /// Load a schema from a JSON file.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        const OP: &str = "load_json_schema";

        let data = std::fs::read_to_string(path).map_err(|err| {
            EngineError::new(ErrorKind::NotFound, OP, "failed to read schema file")
                .with("path", path.display().to_string())
                .with("error", err.to_string())
        })?;

        serde_json::from_str(&data).map_err(|err| {
            EngineError::new(ErrorKind::InvalidInput, OP, "failed to parse schema")
                .with("path", path.display().to_string())
                .with("error", err.to_string())
        })
    }

    /// Validate a document, collecting every violation.
    pub fn validate(&self, data: &Value) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        self.validate_at(data, "", &mut violations);
        violations
    }

    fn validate_at(&self, data: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
        if let Some(expected) = self.schema_type.as_deref() {
            if !type_matches(data, expected) {
                out.push(SchemaViolation {
                    path: path.to_string(),
                    message: format!(
                        "expected type {expected}, got {}",
                        type_name(data)
                    ),
                });
                // Descending into a mistyped value only produces noise.
                return;
            }
        }

        if !self.enumeration.is_empty() && !self.enumeration.contains(data) {
            out.push(SchemaViolation {
                path: path.to_string(),
                message: format!(
                    "value must be one of {}",
                    serde_json::to_string(&self.enumeration).unwrap_or_default()
                ),
            });
        }

        match data {
            Value::Object(map) => {
                for required in &self.required {
                    if !map.contains_key(required) {
                        out.push(SchemaViolation {
                            path: join(path, required),
                            message: "required field is missing".to_string(),
                        });
                    }
                }

                for (key, value) in map {
                    match self.properties.get(key) {
                        Some(prop) => prop.validate_at(value, &join(path, key), out),
                        None => {
                            if self.additional_properties == Some(false) {
                                out.push(SchemaViolation {
                                    path: join(path, key),
                                    message: "additional property not allowed".to_string(),
                                });
                            }
                        }
                    }
                }
            }
            Value::Array(items) => {
                if let Some(item_schema) = &self.items {
                    for (i, item) in items.iter().enumerate() {
                        item_schema.validate_at(item, &format!("{path}[{i}]"), out);
                    }
                }
            }
            Value::String(s) => {
                if let Some(min) = self.min_length {
                    if s.len() < min {
                        out.push(SchemaViolation {
                            path: path.to_string(),
                            message: format!(
                                "string length {} is less than minimum {min}",
                                s.len()
                            ),
                        });
                    }
                }
                if let Some(max) = self.max_length {
                    if s.len() > max {
                        out.push(SchemaViolation {
                            path: path.to_string(),
                            message: format!(
                                "string length {} is greater than maximum {max}",
                                s.len()
                            ),
                        });
                    }
                }
            }
            Value::Number(n) => {
                let value = n.as_f64().unwrap_or_default();
                if let Some(min) = self.minimum {
                    if value < min {
                        out.push(SchemaViolation {
                            path: path.to_string(),
                            message: format!("value {value} is less than minimum {min}"),
                        });
                    }
                }
                if let Some(max) = self.maximum {
                    if value > max {
                        out.push(SchemaViolation {
                            path: path.to_string(),
                            message: format!("value {value} is greater than maximum {max}"),
                        });
                    }
                }
            }
            _ => {}
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}

fn type_matches(data: &Value, expected: &str) -> bool {
    match expected {
        "string" => data.is_string(),
        "number" => data.is_number(),
        "integer" => match data.as_f64() {
            Some(n) => n.fract() == 0.0,
            None => false,
        },
        "boolean" => data.is_boolean(),
        "array" => data.is_array(),
        "object" => data.is_object(),
        "null" => data.is_null(),
        // Unknown type names accept anything, matching the permissive
        // treatment of pattern/format.
        _ => true,
    }
}

fn type_name(data: &Value) -> &'static str {
    match data {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(raw: Value) -> JsonSchema {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn object_with_required_and_typed_properties() {
        let schema = schema(json!({
            "type": "object",
            "required": ["id", "name"],
            "properties": {
                "id": {"type": "string"},
                "name": {"type": "string"},
                "age": {"type": "integer", "minimum": 0}
            }
        }));

        assert!(schema
            .validate(&json!({"id": "u1", "name": "Alice", "age": 30}))
            .is_empty());

        let violations = schema.validate(&json!({"id": "u1", "age": -1}));
        let messages: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
        assert_eq!(violations.len(), 2);
        assert!(messages
            .iter()
            .any(|m| m.contains("name") && m.contains("required field is missing")));
        assert!(messages
            .iter()
            .any(|m| m.contains("age") && m.contains("less than minimum")));
    }

    #[test]
    fn integer_means_number_with_zero_fraction() {
        let schema = schema(json!({"type": "integer"}));
        assert!(schema.validate(&json!(5)).is_empty());
        assert!(schema.validate(&json!(5.0)).is_empty());
        assert!(!schema.validate(&json!(5.5)).is_empty());
        assert!(!schema.validate(&json!("5")).is_empty());
    }

    #[test]
    fn wrong_type_stops_descent() {
        let schema = schema(json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "string"}}
        }));
        let violations = schema.validate(&json!([1, 2]));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("expected type object"));
    }

    #[test]
    fn additional_properties_false_rejects_extras() {
        let schema = schema(json!({
            "type": "object",
            "properties": {"id": {"type": "string"}},
            "additionalProperties": false
        }));
        let violations = schema.validate(&json!({"id": "x", "extra": 1}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "extra");
    }

    #[test]
    fn additional_properties_absent_allows_extras() {
        let schema = schema(json!({
            "type": "object",
            "properties": {"id": {"type": "string"}}
        }));
        assert!(schema.validate(&json!({"id": "x", "extra": 1})).is_empty());
    }

    #[test]
    fn array_items_report_indexed_paths() {
        let schema = schema(json!({
            "type": "array",
            "items": {"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}
        }));
        let violations = schema.validate(&json!([{"name": "a"}, {}]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "[1]/name");
    }

    #[test]
    fn nested_paths_are_slash_delimited() {
        let schema = schema(json!({
            "type": "object",
            "properties": {
                "user": {
                    "type": "object",
                    "properties": {"email": {"type": "string", "minLength": 3}}
                }
            }
        }));
        let violations = schema.validate(&json!({"user": {"email": "x"}}));
        assert_eq!(violations[0].path, "user/email");
    }

    #[test]
    fn enum_membership() {
        let schema = schema(json!({"enum": ["red", "green", "blue"]}));
        assert!(schema.validate(&json!("green")).is_empty());
        assert!(!schema.validate(&json!("purple")).is_empty());
    }

    #[test]
    fn string_length_bounds() {
        let schema = schema(json!({"type": "string", "minLength": 2, "maxLength": 4}));
        assert!(schema.validate(&json!("abc")).is_empty());
        assert!(!schema.validate(&json!("a")).is_empty());
        assert!(!schema.validate(&json!("abcde")).is_empty());
    }

    #[test]
    fn number_bounds() {
        let schema = schema(json!({"type": "number", "minimum": 1.0, "maximum": 10.0}));
        assert!(schema.validate(&json!(5)).is_empty());
        assert!(!schema.validate(&json!(0)).is_empty());
        assert!(!schema.validate(&json!(11)).is_empty());
    }

    #[test]
    fn pattern_and_format_are_ignored() {
        let schema = schema(json!({"type": "string", "pattern": "^[a-z]+$", "format": "email"}));
        assert!(schema.validate(&json!("NOT-MATCHING-123")).is_empty());
    }

    #[test]
    fn violations_are_collected_not_short_circuited() {
        let schema = schema(json!({
            "type": "object",
            "required": ["a", "b"],
            "properties": {
                "a": {"type": "string"},
                "b": {"type": "string"},
                "c": {"type": "integer"}
            }
        }));
        let violations = schema.validate(&json!({"c": 1.5}));
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.json");
        std::fs::write(
            &path,
            r#"{"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}}"#,
        )
        .unwrap();

        let schema = JsonSchema::from_file(&path).unwrap();
        assert!(schema.validate(&json!({"id": "u1"})).is_empty());

        let err = JsonSchema::from_file(&dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
