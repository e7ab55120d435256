//! Duration strings for retry and performance specs.
//!
//! Case files use compact duration literals (`10ms`, `1.5s`, `2m`) for
//! delays and thresholds.

use crate::error::{EngineError, EngineResult, ErrorKind};
use std::time::Duration;

/// Parse a duration literal such as `250ms`, `1.5s`, `2m` or `1h`.
///
/// Supported suffixes: `ns`, `us`, `ms`, `s`, `m`, `h`. A bare number is
/// rejected so a forgotten unit fails loudly instead of guessing.
pub fn parse_duration(input: &str) -> EngineResult<Duration> {
    const OP: &str = "parse_duration";

    let s = input.trim();
    let split = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i);

    let Some(split) = split else {
        return Err(invalid(OP, s, "missing unit suffix"));
    };
    if split == 0 {
        return Err(invalid(OP, s, "missing numeric value"));
    }

    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| invalid(OP, s, "malformed numeric value"))?;

    let nanos_per_unit: f64 = match unit {
        "ns" => 1.0,
        "us" => 1_000.0,
        "ms" => 1_000_000.0,
        "s" => 1_000_000_000.0,
        "m" => 60.0 * 1_000_000_000.0,
        "h" => 3_600.0 * 1_000_000_000.0,
        _ => return Err(invalid(OP, s, "unknown unit suffix")),
    };

    Ok(Duration::from_nanos((value * nanos_per_unit) as u64))
}

/// Seconds with millisecond precision, as used by report output.
pub fn format_seconds(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

fn invalid(op: &str, input: &str, message: &str) -> EngineError {
    EngineError::new(ErrorKind::InvalidInput, op, message).with("input", input)
}
