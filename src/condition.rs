//! Step conditions and loop expansion.
//!
//! A condition is rendered first, then parsed as either `LEFT OP RIGHT` or
//! a bare truthiness check. Numeric comparison is attempted before string
//! comparison; relational operators on non-numeric operands fail.

use crate::context::Context;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::LoopSpec;
use crate::render::{render_str, render_value, RenderOptions};
use serde_json::Value;

// Longest operators first so ">=" is never mis-parsed as ">".
const OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

/// Evaluate a condition string against the context. An empty condition is
/// always true.
pub fn evaluate_condition(condition: &str, ctx: &Context) -> EngineResult<bool> {
    if condition.is_empty() {
        return Ok(true);
    }

    let rendered = render_str(condition, ctx, RenderOptions::default())?;

    for op in OPERATORS {
        if let Some((left, right)) = rendered.split_once(op) {
            return compare(left.trim(), op, right.trim());
        }
    }

    Ok(is_truthy(&rendered))
}

fn compare(left: &str, op: &str, right: &str) -> EngineResult<bool> {
    const OP: &str = "evaluate_condition";

    if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return Ok(match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            "<" => l < r,
            ">=" => l >= r,
            "<=" => l <= r,
            _ => unreachable!("operator list is closed"),
        });
    }

    let left = strip_quotes(left);
    let right = strip_quotes(right);
    match op {
        "==" => Ok(left == right),
        "!=" => Ok(left != right),
        _ => Err(EngineError::new(
            ErrorKind::InvalidInput,
            OP,
            "operator not supported for string comparison",
        )
        .with("operator", op)
        .with("left", left)
        .with("right", right)),
    }
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

/// Empty string, `false`, `0`, `null`, `nil` and `undefined` are false;
/// everything else is true. Case-insensitive.
pub fn is_truthy(s: &str) -> bool {
    let s = s.trim().to_lowercase();
    !matches!(s.as_str(), "" | "false" | "0" | "null" | "nil" | "undefined")
}

/// Expand a loop spec into one child context per iteration, each binding
/// `loopIndex`, `loopItem` and the named loop variable.
///
/// An items list and a numeric range are mutually exclusive; the range step
/// defaults to 1 and may be negative when counting down.
pub fn expand_loop(spec: &LoopSpec, ctx: &Context) -> EngineResult<Vec<Context>> {
    const OP: &str = "expand_loop";

    let items: Vec<Value> = if !spec.items.is_empty() {
        if spec.range.is_some() {
            return Err(EngineError::new(
                ErrorKind::InvalidInput,
                OP,
                "loop items and range are mutually exclusive",
            ));
        }
        spec.items
            .iter()
            .map(|item| render_value(item, ctx, RenderOptions::default()))
            .collect::<EngineResult<_>>()?
    } else if let Some(range) = &spec.range {
        let step = if range.step == 0 { 1 } else { range.step };
        let mut out = Vec::new();
        let mut i = range.from;
        if step > 0 {
            while i <= range.to {
                out.push(Value::from(i));
                i += step;
            }
        } else {
            while i >= range.to {
                out.push(Value::from(i));
                i += step;
            }
        }
        out
    } else {
        return Err(EngineError::new(
            ErrorKind::InvalidInput,
            OP,
            "loop must have either items or range",
        ));
    };

    Ok(items
        .iter()
        .enumerate()
        .map(|(i, item)| ctx.loop_iteration(i, item, spec.var.as_deref()))
        .collect())
}
