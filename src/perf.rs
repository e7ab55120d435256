//! Post-hoc performance checks.
//!
//! Thresholds never interrupt a request; they are compared against the
//! measured dispatch duration after the fact.

use crate::duration::parse_duration;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::PerformanceSpec;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct ParsedPerformance {
    pub max_duration: Option<Duration>,
    pub warn_duration: Option<Duration>,
    pub fail_on_warning: bool,
}

impl ParsedPerformance {
    pub fn parse(spec: &PerformanceSpec) -> EngineResult<Self> {
        let max_duration = spec
            .max_duration
            .as_deref()
            .map(parse_duration)
            .transpose()?;
        let warn_duration = spec
            .warn_duration
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        Ok(Self {
            max_duration,
            warn_duration,
            fail_on_warning: spec.fail_on_warning,
        })
    }

    /// Check a measured duration. Exceeding `max_duration` fails; exceeding
    /// `warn_duration` logs a warning and fails only with `failOnWarning`.
    pub fn check(&self, step: &str, measured: Duration) -> EngineResult<()> {
        const OP: &str = "check_performance";

        if let Some(max) = self.max_duration {
            if measured > max {
                return Err(EngineError::new(
                    ErrorKind::Http,
                    OP,
                    "request duration exceeded maximum",
                )
                .with("step", step)
                .with("measuredMs", measured.as_millis() as u64)
                .with("maxMs", max.as_millis() as u64));
            }
        }

        if let Some(threshold) = self.warn_duration {
            if measured > threshold {
                warn!(
                    step,
                    measured_ms = measured.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    "request duration exceeded warning threshold"
                );
                if self.fail_on_warning {
                    return Err(EngineError::new(
                        ErrorKind::Http,
                        OP,
                        "request duration exceeded warning threshold",
                    )
                    .with("step", step)
                    .with("measuredMs", measured.as_millis() as u64)
                    .with("warnMs", threshold.as_millis() as u64));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(max: Option<&str>, warn: Option<&str>, fail_on_warning: bool) -> PerformanceSpec {
        PerformanceSpec {
            max_duration: max.map(str::to_string),
            warn_duration: warn.map(str::to_string),
            fail_on_warning,
        }
    }

    #[test]
    fn within_limits_passes() {
        let perf = ParsedPerformance::parse(&spec(Some("200ms"), None, false)).unwrap();
        assert!(perf.check("s", Duration::from_millis(50)).is_ok());
        assert!(perf.check("s", Duration::from_millis(200)).is_ok());
    }

    #[test]
    fn exceeding_max_fails() {
        let perf = ParsedPerformance::parse(&spec(Some("200ms"), None, false)).unwrap();
        let err = perf.check("s", Duration::from_millis(250)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Http);
        assert!(err.to_string().contains("exceeded maximum"));
    }

    #[test]
    fn warning_threshold_alone_does_not_fail() {
        let perf = ParsedPerformance::parse(&spec(None, Some("100ms"), false)).unwrap();
        assert!(perf.check("s", Duration::from_millis(150)).is_ok());
    }

    #[test]
    fn warning_threshold_fails_with_fail_on_warning() {
        let perf = ParsedPerformance::parse(&spec(None, Some("100ms"), true)).unwrap();
        let err = perf.check("s", Duration::from_millis(150)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Http);
    }

    #[test]
    fn malformed_duration_is_invalid_input() {
        let err = ParsedPerformance::parse(&spec(Some("fast"), None, false)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
