//! Placeholder templating.
//!
//! `{{KEY}}` placeholders are resolved against the case [`Context`]. A miss
//! leaves the placeholder verbatim in permissive mode and fails the render
//! in strict mode. When a whole string value is a single placeholder that
//! resolves to a non-string, the resolved value keeps its native JSON type.

use crate::context::Context;
use crate::error::{EngineError, EngineResult, ErrorKind};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;

// Matches {{ key }} where key is a dotted/indexed context path.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z0-9._\[\]\-]+)\}\}").expect("failed to compile placeholder regex")
});

/// How to handle placeholders that miss the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Leave the placeholder verbatim.
    #[default]
    Permissive,
    /// Fail the render.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub mode: RenderMode,
}

impl RenderOptions {
    pub fn strict() -> Self {
        Self {
            mode: RenderMode::Strict,
        }
    }
}

/// Render every placeholder in `input` against the context.
pub fn render_str(input: &str, ctx: &Context, opts: RenderOptions) -> EngineResult<String> {
    const OP: &str = "render_template";

    let mut missing: Option<String> = None;
    let out = PLACEHOLDER_RE.replace_all(input, |caps: &Captures| {
        let key = &caps[1];
        match ctx.get(key) {
            Some(value) => stringify(value),
            None => {
                if opts.mode == RenderMode::Strict {
                    missing.get_or_insert_with(|| key.to_string());
                }
                caps[0].to_string()
            }
        }
    });

    match missing {
        Some(key) => Err(EngineError::new(
            ErrorKind::InvalidInput,
            OP,
            "placeholder not found in context",
        )
        .with("placeholder", key)),
        None => Ok(out.into_owned()),
    }
}

/// Render a JSON value recursively.
///
/// A string that consists of exactly one placeholder takes the native type
/// of the resolved value, so `"{{count}}"` stays a number for downstream
/// assertions and request bodies.
pub fn render_value(value: &Value, ctx: &Context, opts: RenderOptions) -> EngineResult<Value> {
    match value {
        Value::String(s) => {
            if let Some(key) = whole_placeholder(s) {
                if let Some(resolved) = ctx.get(key) {
                    return Ok(resolved.clone());
                }
            }
            render_str(s, ctx, opts).map(Value::String)
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, ctx, opts)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(render_value(v, ctx, opts)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// Default stringification: strings verbatim, integers and booleans without
/// decoration, structured values as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Returns the key when the whole string is a single placeholder.
fn whole_placeholder(s: &str) -> Option<&str> {
    let caps = PLACEHOLDER_RE.captures(s)?;
    let all = caps.get(0)?;
    if all.start() == 0 && all.end() == s.len() {
        Some(caps.get(1)?.as_str())
    } else {
        None
    }
}
