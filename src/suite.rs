//! Public facade: configuration and the all-cases entry point.

use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{DbConnector, DbType, FixtureLoader};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::junit::write_junit_report;
use crate::loader::load_cases;
use crate::mock::MockManager;
use crate::model::CaseResult;
use crate::render::RenderOptions;
use crate::runner::{CaseRunner, ReqCallback, RunSettings};

/// Everything a run needs. Build one with [`Config::new`] and fill in the
/// optional collaborators the cases use.
#[derive(Clone, Default)]
pub struct Config {
    /// The handler under test; every step and HTTP hook dispatches to it
    /// in-memory.
    pub handler: Router,
    /// Directory of `*.yml` case files.
    pub cases_dir: PathBuf,
    /// Directory of fixture files referenced by case `fixtures` lists.
    pub fixtures_dir: Option<PathBuf>,
    pub conn_str: Option<String>,
    pub db_type: DbType,
    pub connector: Option<Arc<dyn DbConnector>>,
    pub fixture_loader: Option<Arc<dyn FixtureLoader>>,
    pub mock_manager: Option<Arc<MockManager>>,
    pub before_req: Option<ReqCallback>,
    pub after_req: Option<ReqCallback>,
    /// Where to write the JUnit XML report, if anywhere.
    pub junit_report: Option<PathBuf>,
    pub render: RenderOptions,
}

impl Config {
    pub fn new(handler: Router, cases_dir: impl Into<PathBuf>) -> Self {
        Self {
            handler,
            cases_dir: cases_dir.into(),
            ..Self::default()
        }
    }

    /// Check the configuration as a whole, reporting every problem at once.
    pub fn validate(&self) -> EngineResult<()> {
        const OP: &str = "validate_config";

        let mut problems = Vec::new();

        if self.cases_dir.as_os_str().is_empty() {
            problems.push("cases_dir is required".to_string());
        } else if !self.cases_dir.is_dir() {
            problems.push(format!(
                "cases_dir is not a directory: {}",
                self.cases_dir.display()
            ));
        }

        if let Some(dir) = &self.fixtures_dir {
            if !dir.is_dir() {
                problems.push(format!(
                    "fixtures_dir is not a directory: {}",
                    dir.display()
                ));
            }
            if self.conn_str.is_none() {
                problems
                    .push("conn_str is required when fixtures_dir is provided".to_string());
            }
            if self.fixture_loader.is_none() {
                problems.push(
                    "fixture_loader is required when fixtures_dir is provided".to_string(),
                );
            }
        }

        if self.conn_str.is_some() && self.connector.is_none() {
            problems.push("connector is required when conn_str is provided".to_string());
        }

        if let Some(report) = &self.junit_report {
            if let Some(parent) = report.parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    if let Err(err) = std::fs::create_dir_all(parent) {
                        problems.push(format!(
                            "cannot create report directory {}: {err}",
                            parent.display()
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::new(ErrorKind::InvalidInput, OP, problems.join("; ")))
        }
    }
}

/// Discover and run every case, in file order. A failing case is reported
/// in its result and never aborts the rest of the run.
pub async fn run(cfg: &Config) -> EngineResult<Vec<CaseResult>> {
    cfg.validate()?;

    let cases = load_cases(&cfg.cases_dir)?;

    let settings = RunSettings {
        cases_dir: cfg.cases_dir.clone(),
        fixtures_dir: cfg.fixtures_dir.clone(),
        conn_str: cfg.conn_str.clone(),
        db_type: cfg.db_type,
        connector: cfg.connector.clone(),
        fixture_loader: cfg.fixture_loader.clone(),
        before_req: cfg.before_req.clone(),
        after_req: cfg.after_req.clone(),
        render: cfg.render,
    };
    let runner = CaseRunner::new(cfg.handler.clone(), cfg.mock_manager.as_deref(), &settings);

    let mut results = Vec::with_capacity(cases.len());
    for case in &cases {
        results.push(runner.run_case(case).await);
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    info!(
        total = results.len(),
        passed,
        failed = results.len() - passed,
        "run finished"
    );

    if let Some(path) = &cfg.junit_report {
        if let Err(err) = write_junit_report(path, "gluon", &results) {
            // Report writing never fails the run.
            warn!(error = %err, "failed to write JUnit report");
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cases_dir_is_rejected() {
        let cfg = Config::default();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("cases_dir is required"));
    }

    #[test]
    fn missing_cases_dir_is_rejected() {
        let cfg = Config::new(Router::new(), "/no/such/cases");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fixtures_dir_requires_conn_str_and_loader() {
        let cases = tempfile::tempdir().unwrap();
        let fixtures = tempfile::tempdir().unwrap();

        let mut cfg = Config::new(Router::new(), cases.path());
        cfg.fixtures_dir = Some(fixtures.path().to_path_buf());

        let err = cfg.validate().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("conn_str is required"));
        assert!(text.contains("fixture_loader is required"));
    }

    #[test]
    fn conn_str_requires_connector() {
        let cases = tempfile::tempdir().unwrap();
        let mut cfg = Config::new(Router::new(), cases.path());
        cfg.conn_str = Some("postgres://localhost/test".to_string());

        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("connector is required"));
    }

    #[test]
    fn junit_report_directory_is_created() {
        let cases = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let report = out.path().join("nested").join("report.xml");

        let mut cfg = Config::new(Router::new(), cases.path());
        cfg.junit_report = Some(report.clone());

        cfg.validate().unwrap();
        assert!(report.parent().unwrap().is_dir());
    }

    #[test]
    fn minimal_config_validates() {
        let cases = tempfile::tempdir().unwrap();
        let cfg = Config::new(Router::new(), cases.path());
        cfg.validate().unwrap();
    }
}
