//! Retry configuration and decisions.
//!
//! The step executor owns the retry loop itself; this module parses the
//! spec, computes the backoff schedule, and decides whether a given attempt
//! outcome warrants another try.

use crate::duration::parse_duration;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::RetrySpec;
use std::time::Duration;

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant,
    Linear,
    Exponential,
}

/// A validated retry configuration.
#[derive(Debug, Clone)]
pub struct ParsedRetry {
    pub attempts: u32,
    pub backoff: Backoff,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub retry_on: Vec<u16>,
    pub retry_on_error: bool,
}

impl ParsedRetry {
    /// Single-attempt semantics: equivalent to a step without retry.
    pub fn single_attempt() -> Self {
        Self {
            attempts: 1,
            backoff: Backoff::Exponential,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retry_on: Vec::new(),
            retry_on_error: false,
        }
    }

    pub fn parse(spec: &RetrySpec) -> EngineResult<Self> {
        const OP: &str = "parse_retry";

        if spec.attempts < 1 {
            return Err(EngineError::new(
                ErrorKind::InvalidInput,
                OP,
                "attempts must be at least 1",
            )
            .with("attempts", spec.attempts));
        }

        let backoff = match spec.backoff.as_deref() {
            None | Some("") | Some("exponential") => Backoff::Exponential,
            Some("linear") => Backoff::Linear,
            Some("constant") => Backoff::Constant,
            Some(other) => {
                return Err(EngineError::new(
                    ErrorKind::InvalidInput,
                    OP,
                    "unknown backoff strategy",
                )
                .with("backoff", other))
            }
        };

        let initial_delay = match &spec.initial_delay {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_INITIAL_DELAY,
        };
        let max_delay = match &spec.max_delay {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_MAX_DELAY,
        };

        Ok(Self {
            attempts: spec.attempts,
            backoff,
            initial_delay,
            max_delay,
            retry_on: spec.retry_on.clone(),
            retry_on_error: spec.retry_on_error,
        })
    }

    /// Delay to sleep after `completed` attempts, capped at `max_delay`.
    pub fn delay_after(&self, completed: u32) -> Duration {
        if completed == 0 {
            return Duration::ZERO;
        }

        let delay = match self.backoff {
            Backoff::Constant => self.initial_delay,
            Backoff::Linear => self.initial_delay.saturating_mul(completed),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(completed - 1);
                self.initial_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }

    /// Whether the outcome of the attempt counts as success for the retry
    /// loop: no transport error, status below 400, and status not in the
    /// retry allowlist.
    pub fn is_success(&self, status: Option<u16>) -> bool {
        match status {
            Some(status) => status < 400 && !self.retries_status(status),
            None => false,
        }
    }

    /// Whether another attempt should follow. `status` is `None` when the
    /// dispatch itself errored.
    pub fn should_retry(&self, attempt: u32, status: Option<u16>) -> bool {
        if attempt >= self.attempts {
            return false;
        }

        match status {
            None => self.retry_on_error,
            Some(status) => self.retries_status(status),
        }
    }

    fn retries_status(&self, status: u16) -> bool {
        self.retry_on.contains(&status)
    }
}
