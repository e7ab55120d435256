//! Structured engine errors.
//!
//! Every failure the engine reports carries a kind from a closed taxonomy,
//! the name of the operation that produced it, a message, and a map of
//! contextual key/values rendered in deterministic order. Keys prefixed
//! with `!` (convention: `!body` for large blobs) always render last.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Missing fixture directory, response path, mock, or array index.
    #[error("not found")]
    NotFound,
    /// Malformed case data, unknown operator, bad retry/performance spec,
    /// invalid regex.
    #[error("invalid input")]
    InvalidInput,
    /// Connection, query, scan, or column-introspection failure.
    #[error("database error")]
    Database,
    /// Request marshaling, unexpected status, header or body mismatch.
    #[error("HTTP error")]
    Http,
    /// Mock resolution failure or call-count mismatch.
    #[error("mock error")]
    Mock,
    /// Diagnostic marshaling or report file I/O.
    #[error("internal error")]
    Internal,
}

/// An engine error with attached operation name and context map.
#[derive(Debug, Clone)]
pub struct EngineError {
    kind: ErrorKind,
    op: String,
    message: String,
    context: BTreeMap<String, Value>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, op: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            op: op.into(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach a contextual key/value pair.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.message, self.op, self.kind)?;

        if self.context.is_empty() {
            return Ok(());
        }

        // BTreeMap iteration is already sorted; split out the `!` keys so
        // they come last, each group in key order.
        let (plain, bang): (Vec<_>, Vec<_>) = self
            .context
            .iter()
            .partition(|(k, _)| !k.starts_with('!'));

        f.write_str(" {")?;
        for (i, (k, v)) in plain.into_iter().chain(bang).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={}", render_context_value(v))?;
        }
        f.write_str("}")
    }
}

impl std::error::Error for EngineError {}

/// Context values print without surrounding JSON quotes for strings.
fn render_context_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_includes_kind_op_and_message() {
        let err = EngineError::new(ErrorKind::Http, "assert_response", "unexpected status code");
        let text = err.to_string();
        assert!(text.contains("unexpected status code"));
        assert!(text.contains("assert_response"));
        assert!(text.contains("HTTP error"));
    }

    #[test]
    fn context_keys_render_sorted() {
        let err = EngineError::new(ErrorKind::Database, "db_check", "query failed")
            .with("query", "SELECT 1")
            .with("attempt", 2)
            .with("column", "id");
        assert_eq!(
            err.to_string(),
            "query failed: db_check: database error \
             {attempt=2, column=id, query=SELECT 1}"
        );
    }

    #[test]
    fn bang_keys_render_last() {
        let err = EngineError::new(ErrorKind::Http, "assert_response", "unexpected status code")
            .with("!body", "{\"error\":\"boom\"}")
            .with("actual", 500)
            .with("expected", 200);
        assert_eq!(
            err.to_string(),
            "unexpected status code: assert_response: HTTP error \
             {actual=500, expected=200, !body={\"error\":\"boom\"}}"
        );
    }

    #[test]
    fn non_string_context_values_keep_json_form() {
        let err = EngineError::new(ErrorKind::Mock, "assert_mock_calls", "count mismatch")
            .with("expected", json!([1, 2]));
        assert!(err.to_string().ends_with("{expected=[1,2]}"));
    }

    #[test]
    fn kind_is_preserved() {
        let err = EngineError::new(ErrorKind::NotFound, "lookup", "missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
