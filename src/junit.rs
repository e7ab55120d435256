//! JUnit-style XML reports.
//!
//! One `<testsuite>` per run with a `<testcase>` per case; failed cases
//! carry a `<failure>` element with the error text.

use std::path::Path;
use std::time::Duration;

use crate::duration::format_seconds;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::CaseResult;

/// Write a JUnit report for the given results.
pub fn write_junit_report(
    path: &Path,
    suite_name: &str,
    results: &[CaseResult],
) -> EngineResult<()> {
    const OP: &str = "write_junit_report";

    let failures = results.iter().filter(|r| !r.passed()).count();
    let total: Duration = results.iter().map(|r| r.duration).sum();

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" time=\"{}\">\n",
        escape(suite_name),
        results.len(),
        failures,
        format_seconds(total),
    ));

    for result in results {
        if let Some(error) = &result.error {
            xml.push_str(&format!(
                "  <testcase name=\"{}\" time=\"{}\">\n    <failure message=\"{}\"></failure>\n  </testcase>\n",
                escape(&result.name),
                format_seconds(result.duration),
                escape(error),
            ));
        } else {
            xml.push_str(&format!(
                "  <testcase name=\"{}\" time=\"{}\"></testcase>\n",
                escape(&result.name),
                format_seconds(result.duration),
            ));
        }
    }
    xml.push_str("</testsuite>\n");

    std::fs::write(path, xml).map_err(|err| {
        EngineError::new(ErrorKind::Internal, OP, "failed to write report file")
            .with("path", path.display().to_string())
            .with("error", err.to_string())
    })
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
