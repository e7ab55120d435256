//! Response and value assertions.
//!
//! Three independent surfaces: status/headers/body shape, JSON-Schema
//! conformance, and path/operator assertions. Database checks reuse the
//! wildcard JSON matcher against the marshaled row array.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

use crate::context::Context;
use crate::dispatch::RecordedResponse;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::{ResponseAssertion, ResponseSpec};
use crate::path::lookup;
use crate::render::{render_value, stringify, RenderOptions};
use crate::schema::JsonSchema;

/// Wildcard token: asserts the key exists with any value.
pub const PRESENCE: &str = "<<PRESENCE>>";

const CONTENT_TYPE_JSON_UTF8: &str = "application/json; charset=utf-8";

/// Assert status, headers, body shape, schema and operator assertions
/// against a recorded response.
pub fn assert_response(
    step: &str,
    expected: &ResponseSpec,
    actual: &RecordedResponse,
    ctx: &Context,
    resolve_dir: &Path,
) -> EngineResult<()> {
    const OP: &str = "assert_response";

    if actual.status != expected.status {
        return Err(
            EngineError::new(ErrorKind::Http, OP, "unexpected status code")
                .with("step", step)
                .with("expected", expected.status)
                .with("actual", actual.status)
                .with("!body", actual.body_text().replace('\n', " ")),
        );
    }

    for (name, want) in effective_headers(expected) {
        match actual.header(&name) {
            Some(got) => {
                if got != want {
                    return Err(EngineError::new(ErrorKind::Http, OP, "unexpected response header")
                        .with("step", step)
                        .with("header", name)
                        .with("expected", want)
                        .with("actual", got));
                }
            }
            None => {
                return Err(EngineError::new(ErrorKind::Http, OP, "missing response header")
                    .with("step", step)
                    .with("header", name)
                    .with("expected", want));
            }
        }
    }

    if let Some(expected_json) = &expected.json {
        let body = parse_json_body(step, actual)?;
        let rendered = render_value(expected_json, ctx, RenderOptions::default())?;
        let mismatches = json_match(&rendered, &body, "$");
        if !mismatches.is_empty() {
            return Err(EngineError::new(ErrorKind::Http, OP, "response body mismatch")
                .with("step", step)
                .with("mismatches", mismatches.join("; ")));
        }
    } else if let Some(expected_text) = &expected.text {
        let rendered = crate::render::render_str(expected_text, ctx, RenderOptions::default())?;
        let body = actual.body_text();
        if body != rendered {
            return Err(EngineError::new(ErrorKind::Http, OP, "unexpected response body")
                .with("step", step)
                .with("expected", rendered)
                .with("actual", body.into_owned()));
        }
    }

    let file_schema = expected
        .schema
        .as_deref()
        .map(|raw| {
            let path = Path::new(raw);
            if path.is_relative() {
                JsonSchema::from_file(&resolve_dir.join(path))
            } else {
                JsonSchema::from_file(path)
            }
        })
        .transpose()?;

    for schema in file_schema.iter().chain(expected.json_schema.iter()) {
        let body = parse_json_body(step, actual)?;
        let violations = schema.validate(&body);
        if !violations.is_empty() {
            let rendered: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
            return Err(EngineError::new(ErrorKind::Http, OP, "schema validation failed")
                .with("step", step)
                .with("violations", rendered.join("; ")));
        }
    }

    if !expected.assertions.is_empty() {
        let body = parse_json_body(step, actual)?;
        for assertion in &expected.assertions {
            assert_path_operator(step, assertion, &body, ctx)?;
        }
    }

    Ok(())
}

/// Expected headers, with `Content-Type: application/json; charset=utf-8`
/// auto-injected when the author set `response.json` but declared no
/// headers map at all.
fn effective_headers(expected: &ResponseSpec) -> HashMap<String, String> {
    match &expected.headers {
        Some(headers) => headers.clone(),
        None if expected.json.is_some() => HashMap::from([(
            "Content-Type".to_string(),
            CONTENT_TYPE_JSON_UTF8.to_string(),
        )]),
        None => HashMap::new(),
    }
}

fn parse_json_body(step: &str, actual: &RecordedResponse) -> EngineResult<Value> {
    serde_json::from_slice(&actual.body).map_err(|err| {
        EngineError::new(
            ErrorKind::Http,
            "assert_response",
            "response body is not valid JSON",
        )
        .with("step", step)
        .with("error", err.to_string())
        .with("!body", actual.body_text().replace('\n', " "))
    })
}

/// Evaluate a single path/operator assertion against a parsed document.
/// The expected value is rendered through the context first.
pub fn assert_path_operator(
    step: &str,
    assertion: &ResponseAssertion,
    doc: &Value,
    ctx: &Context,
) -> EngineResult<()> {
    const OP: &str = "assert_path_operator";

    let prefix = |err: EngineError| match &assertion.message {
        Some(msg) => EngineError::new(err.kind(), err.op(), format!("{msg}: {}", err.message()))
            .with("step", step)
            .with("path", assertion.path.clone()),
        None => err.with("step", step).with("path", assertion.path.clone()),
    };

    let actual = lookup(doc, &assertion.path).map_err(&prefix)?;
    let expected = render_value(&assertion.value, ctx, RenderOptions::default())?;

    let passed = evaluate_operator(actual, &assertion.operator, &expected).map_err(&prefix)?;
    if passed {
        return Ok(());
    }

    Err(prefix(
        EngineError::new(ErrorKind::Http, OP, "assertion failed")
            .with("operator", assertion.operator.clone())
            .with("expected", expected.clone())
            .with("actual", actual.clone()),
    ))
}

/// Evaluate one operator from the closed vocabulary. A `false` result is an
/// assertion failure; an `Err` means the assertion itself is malformed or
/// inapplicable.
pub fn evaluate_operator(actual: &Value, operator: &str, expected: &Value) -> EngineResult<bool> {
    const OP: &str = "evaluate_operator";

    match operator {
        "equals" | "eq" | "==" => Ok(loose_eq(actual, expected)),
        "notEquals" | "ne" | "!=" => Ok(!loose_eq(actual, expected)),
        "greaterThan" | "gt" | ">" => numeric_cmp(actual, expected, |a, e| a > e),
        "lessThan" | "lt" | "<" => numeric_cmp(actual, expected, |a, e| a < e),
        "greaterOrEqual" | "gte" | ">=" => numeric_cmp(actual, expected, |a, e| a >= e),
        "lessOrEqual" | "lte" | "<=" => numeric_cmp(actual, expected, |a, e| a <= e),
        "contains" => Ok(contains(actual, expected)),
        "notContains" => Ok(!contains(actual, expected)),
        "matches" => {
            let pattern = Regex::new(&stringify(expected)).map_err(|err| {
                EngineError::new(ErrorKind::InvalidInput, OP, "invalid regex pattern")
                    .with("pattern", stringify(expected))
                    .with("error", err.to_string())
            })?;
            Ok(pattern.is_match(&stringify(actual)))
        }
        "startsWith" => Ok(stringify(actual).starts_with(&stringify(expected))),
        "endsWith" => Ok(stringify(actual).ends_with(&stringify(expected))),
        "between" => {
            let bounds = expected.as_array().filter(|arr| arr.len() == 2).ok_or_else(|| {
                EngineError::new(
                    ErrorKind::InvalidInput,
                    OP,
                    "expected value for 'between' must be [min, max]",
                )
            })?;
            let value = require_number(actual, OP)?;
            let min = require_number(&bounds[0], OP)?;
            let max = require_number(&bounds[1], OP)?;
            Ok(value >= min && value <= max)
        }
        "in" => Ok(is_in(actual, expected)),
        "notIn" => Ok(!is_in(actual, expected)),
        "isEmpty" => Ok(is_empty(actual)),
        "isNotEmpty" => Ok(!is_empty(actual)),
        "hasLength" => length_cmp(actual, expected, |len, want| len == want),
        "hasMinLength" => length_cmp(actual, expected, |len, want| len >= want),
        "hasMaxLength" => length_cmp(actual, expected, |len, want| len <= want),
        other => Err(EngineError::new(ErrorKind::InvalidInput, OP, "unknown operator")
            .with("operator", other)),
    }
}

/// Equality by stringified form, so `42 == "42"`.
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    stringify(actual) == stringify(expected)
}

fn numeric_cmp(
    actual: &Value,
    expected: &Value,
    cmp: fn(f64, f64) -> bool,
) -> EngineResult<bool> {
    const OP: &str = "evaluate_operator";
    let a = require_number(actual, OP)?;
    let e = require_number(expected, OP)?;
    Ok(cmp(a, e))
}

fn require_number(value: &Value, op: &str) -> EngineResult<f64> {
    value.as_f64().ok_or_else(|| {
        EngineError::new(ErrorKind::InvalidInput, op, "cannot compare non-numeric value")
            .with("value", value.clone())
    })
}

/// Arrays match any element by stringified equality; strings use substring
/// search.
fn contains(actual: &Value, expected: &Value) -> bool {
    let needle = stringify(expected);
    match actual {
        Value::Array(items) => items.iter().any(|item| stringify(item) == needle),
        other => stringify(other).contains(&needle),
    }
}

fn is_in(actual: &Value, expected: &Value) -> bool {
    let Some(items) = expected.as_array() else {
        return false;
    };
    let actual = stringify(actual);
    items.iter().any(|item| stringify(item) == actual)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn length_cmp(
    actual: &Value,
    expected: &Value,
    cmp: fn(usize, usize) -> bool,
) -> EngineResult<bool> {
    const OP: &str = "evaluate_operator";

    let len = match actual {
        Value::String(s) => s.len(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => {
            return Err(EngineError::new(
                ErrorKind::InvalidInput,
                OP,
                "cannot take length of non-collection value",
            )
            .with("value", other.clone()))
        }
    };

    let want = require_number(expected, OP)?;
    if want < 0.0 || want.fract() != 0.0 {
        return Err(EngineError::new(
            ErrorKind::InvalidInput,
            OP,
            "length expectation must be a non-negative integer",
        )
        .with("value", expected.clone()));
    }

    Ok(cmp(len, want as usize))
}

/// Structural JSON equality with `<<PRESENCE>>` wildcards. Returns a list
/// of mismatch descriptions; empty means the documents match.
pub fn json_match(expected: &Value, actual: &Value, at: &str) -> Vec<String> {
    if expected == &Value::String(PRESENCE.to_string()) {
        return Vec::new();
    }

    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => {
            let mut mismatches = Vec::new();
            for (key, exp_value) in exp {
                match act.get(key) {
                    Some(act_value) => {
                        mismatches.extend(json_match(exp_value, act_value, &format!("{at}.{key}")));
                    }
                    None => mismatches.push(format!("missing key at {at}.{key}")),
                }
            }
            for key in act.keys() {
                if !exp.contains_key(key) {
                    mismatches.push(format!("unexpected key at {at}.{key}"));
                }
            }
            mismatches
        }
        (Value::Array(exp), Value::Array(act)) => {
            if exp.len() != act.len() {
                return vec![format!(
                    "array length mismatch at {at}: expected {}, got {}",
                    exp.len(),
                    act.len()
                )];
            }
            exp.iter()
                .zip(act)
                .enumerate()
                .flat_map(|(i, (e, a))| json_match(e, a, &format!("{at}[{i}]")))
                .collect()
        }
        (Value::Number(exp), Value::Number(act)) => {
            // 1 and 1.0 are the same JSON number
            if exp.as_f64() == act.as_f64() {
                Vec::new()
            } else {
                vec![format!("value mismatch at {at}: expected {exp}, got {act}")]
            }
        }
        (exp, act) => {
            if exp == act {
                Vec::new()
            } else {
                vec![format!(
                    "value mismatch at {at}: expected {}, got {}",
                    compact(exp),
                    compact(act)
                )]
            }
        }
    }
}

/// Match database rows against an expected JSON array, reusing the wildcard
/// matcher.
pub fn match_rows(expected: &Value, rows: &[Map<String, Value>]) -> Vec<String> {
    let actual = Value::Array(rows.iter().cloned().map(Value::Object).collect());
    json_match(expected, &actual, "$")
}

fn compact(value: &Value) -> String {
    value.to_string()
}
