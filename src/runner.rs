//! Case orchestration and step execution.
//!
//! [`CaseRunner::run_case`] drives one case end to end: context seeding,
//! mock registration, setup hooks, fixtures, the step loop, final mock-call
//! assertions, and teardown on every exit path. Steps flow through the
//! pipeline condition → loop expansion → render → dispatch (with retry) →
//! performance → extraction → assertions → db checks.

use axum::Router;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::assert::{assert_response, match_rows};
use crate::condition::{evaluate_condition, expand_loop};
use crate::context::{normalize_step_name, Context};
use crate::db::{DbConnector, DbType, FixtureConfig, FixtureLoader, LazyDb};
use crate::dispatch::{dispatch, PreparedBody, PreparedRequest, RecordedResponse};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::hooks::{HookExecutor, HookKind};
use crate::mock::{assert_mock_calls, MockManager, Spy};
use crate::model::{CaseResult, Step, TestCase};
use crate::perf::ParsedPerformance;
use crate::render::{render_str, render_value, RenderOptions};
use crate::retry::ParsedRetry;

/// Callback invoked around every step dispatch.
pub type ReqCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Everything a case needs besides the handler and the mock manager.
#[derive(Clone, Default)]
pub struct RunSettings {
    /// Directory case files came from; relative `schema` and `bodyFile`
    /// paths resolve against it.
    pub cases_dir: PathBuf,
    pub fixtures_dir: Option<PathBuf>,
    pub conn_str: Option<String>,
    pub db_type: DbType,
    pub connector: Option<Arc<dyn DbConnector>>,
    pub fixture_loader: Option<Arc<dyn FixtureLoader>>,
    pub before_req: Option<ReqCallback>,
    pub after_req: Option<ReqCallback>,
    pub render: RenderOptions,
}

/// Executes cases against one handler and one set of live mocks.
pub struct CaseRunner<'a> {
    handler: Router,
    mocks: Option<&'a MockManager>,
    settings: &'a RunSettings,
}

impl<'a> CaseRunner<'a> {
    pub fn new(
        handler: Router,
        mocks: Option<&'a MockManager>,
        settings: &'a RunSettings,
    ) -> Self {
        Self {
            handler,
            mocks,
            settings,
        }
    }

    /// Run one case. A failing case never aborts subsequent cases; the
    /// failure is reported through the returned [`CaseResult`].
    #[instrument(skip(self, case), fields(case = %case.name))]
    pub async fn run_case(&self, case: &TestCase) -> CaseResult {
        let started = Instant::now();
        info!("running case");

        let mut ctx = Context::from_env();
        ctx.merge_variables(&case.variables);

        let db = LazyDb::new(
            self.settings.connector.clone(),
            self.settings.conn_str.clone(),
        );

        let error = match self.register_mocks(case, &mut ctx) {
            Err(err) => Some(err),
            Ok(spies) => {
                // Teardown is armed from here on: it runs after the body
                // regardless of setup, fixture, step or assertion failures.
                let body = self.case_body(case, &mut ctx, &db, &spies).await;

                let hooks = HookExecutor::new(&db, &self.handler, self.settings.render);
                if let Err(err) = hooks
                    .execute_hooks(&case.teardown, HookKind::Teardown, &ctx)
                    .await
                {
                    warn!(error = %err, "teardown failed");
                }

                body.err()
            }
        };

        let result = CaseResult {
            name: case.name.clone(),
            duration: started.elapsed(),
            error: error.map(|err| err.to_string()),
        };
        info!(
            passed = result.passed(),
            elapsed_ms = result.duration.as_millis() as u64,
            "case finished"
        );
        result
    }

    async fn case_body(
        &self,
        case: &TestCase,
        ctx: &mut Context,
        db: &LazyDb,
        spies: &HashMap<String, Spy>,
    ) -> EngineResult<()> {
        let hooks = HookExecutor::new(db, &self.handler, self.settings.render);
        hooks
            .execute_hooks(&case.setup, HookKind::Setup, ctx)
            .await?;

        self.load_fixtures(case).await?;

        for step in &case.steps {
            self.execute_step(step, ctx, db).await?;
        }

        let failures = assert_mock_calls(&case.mock_calls, spies);
        if !failures.is_empty() {
            let joined = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::new(
                ErrorKind::Mock,
                "assert_mock_calls",
                "mock call expectations failed",
            )
            .with("failures", joined));
        }

        Ok(())
    }

    /// Resolve every mock the case references, register its routes, and
    /// publish `<name>.baseURL` into the context. The spies stay with the
    /// runner for the final call assertions.
    fn register_mocks(
        &self,
        case: &TestCase,
        ctx: &mut Context,
    ) -> EngineResult<HashMap<String, Spy>> {
        const OP: &str = "register_mocks";

        let mut spies = HashMap::new();

        let mut names: Vec<&String> = case.mock_servers.keys().collect();
        names.sort();

        for name in names {
            let instance = self
                .mocks
                .and_then(|manager| manager.instance(name))
                .ok_or_else(|| {
                    EngineError::new(ErrorKind::Mock, OP, "mock not found")
                        .with("mock", name.clone())
                })?;

            for route in &case.mock_servers[name].routes {
                instance
                    .add_route(route.clone())
                    .map_err(|err| err.with("mock", name.clone()))?;
            }

            ctx.insert(format!("{name}.baseURL"), instance.base_url.clone());
            spies.insert(name.clone(), instance.spy());
        }

        Ok(spies)
    }

    async fn load_fixtures(&self, case: &TestCase) -> EngineResult<()> {
        const OP: &str = "load_fixtures";

        if case.fixtures.is_empty() {
            return Ok(());
        }

        let loader = self.settings.fixture_loader.as_ref().ok_or_else(|| {
            EngineError::new(ErrorKind::InvalidInput, OP, "fixture loader not configured")
        })?;
        let dir = self.settings.fixtures_dir.as_ref().ok_or_else(|| {
            EngineError::new(ErrorKind::NotFound, OP, "fixtures directory not configured")
        })?;
        let conn_str = self.settings.conn_str.as_deref().ok_or_else(|| {
            EngineError::new(
                ErrorKind::InvalidInput,
                OP,
                "connection string required for fixtures",
            )
        })?;

        for fixture in &case.fixtures {
            let file = dir.join(format!("{fixture}.yml"));
            debug!(fixture = %file.display(), "loading fixture");
            let cfg = FixtureConfig::new(file.clone(), conn_str, self.settings.db_type);
            loader.load(&cfg).await.map_err(|err| {
                EngineError::new(ErrorKind::Database, OP, "failed to load fixture")
                    .with("fixture", fixture.clone())
                    .with("file", file.display().to_string())
                    .with("error", err.to_string())
            })?;
        }

        Ok(())
    }

    async fn execute_step(
        &self,
        step: &Step,
        ctx: &mut Context,
        db: &LazyDb,
    ) -> EngineResult<()> {
        let with_step =
            |err: EngineError, name: &str| err.with("step", name.to_string());

        if let Some(when) = &step.when {
            let run = evaluate_condition(when, ctx)
                .map_err(|err| with_step(err, &step.name))?;
            if !run {
                info!(step = %step.name, condition = %when, "step skipped");
                return Ok(());
            }
        }

        if let Some(looping) = &step.looping {
            let iterations =
                expand_loop(looping, ctx).map_err(|err| with_step(err, &step.name))?;
            // Iterations see only the parent scope plus their own bindings;
            // their extractions are discarded with the child context.
            for (i, mut child) in iterations.into_iter().enumerate() {
                let name = format!("{}[{i}]", normalize_step_name(&step.name));
                self.run_step_once(step, &name, &mut child, db)
                    .await
                    .map_err(|err| with_step(err, &name))?;
            }
            return Ok(());
        }

        let name = normalize_step_name(&step.name);
        self.run_step_once(step, &name, ctx, db)
            .await
            .map_err(|err| with_step(err, &name))
    }

    async fn run_step_once(
        &self,
        step: &Step,
        step_name: &str,
        ctx: &mut Context,
        db: &LazyDb,
    ) -> EngineResult<()> {
        const OP: &str = "execute_step";

        let request = self.prepare_request(step, ctx)?;

        let retry = match &step.retry {
            Some(spec) => ParsedRetry::parse(spec)?,
            None => ParsedRetry::single_attempt(),
        };
        let perf = step
            .performance
            .as_ref()
            .map(ParsedPerformance::parse)
            .transpose()?;

        if let Some(callback) = &self.settings.before_req {
            callback().map_err(|err| {
                EngineError::new(ErrorKind::Internal, OP, "before-request callback failed")
                    .with("error", err.to_string())
            })?;
        }

        let mut attempt = 0u32;
        let response: RecordedResponse = loop {
            attempt += 1;
            let outcome = dispatch(&self.handler, &request).await;
            let status = outcome.as_ref().ok().map(|r| r.status);

            if retry.is_success(status) || !retry.should_retry(attempt, status) {
                break outcome?;
            }

            let delay = retry.delay_after(attempt);
            debug!(
                step = step_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                status = ?status,
                "retrying dispatch"
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
        };

        if let Some(callback) = &self.settings.after_req {
            callback().map_err(|err| {
                EngineError::new(ErrorKind::Internal, OP, "after-request callback failed")
                    .with("error", err.to_string())
            })?;
        }

        if let Some(perf) = &perf {
            perf.check(step_name, response.duration)?;
        }

        self.extract_response(step, step_name, ctx, &response)?;

        assert_response(
            step_name,
            &step.response,
            &response,
            ctx,
            &self.settings.cases_dir,
        )?;

        self.run_db_checks(step, step_name, ctx, db).await
    }

    fn prepare_request(&self, step: &Step, ctx: &Context) -> EngineResult<PreparedRequest> {
        const OP: &str = "prepare_request";

        let opts = self.settings.render;
        let path = render_str(&step.request.path, ctx, opts)?;

        let mut headers = HashMap::with_capacity(step.request.headers.len());
        for (name, value) in &step.request.headers {
            headers.insert(name.clone(), render_str(value, ctx, opts)?);
        }

        let body = if let Some(file) = &step.request.body_file {
            let path = Path::new(file);
            let resolved = if path.is_relative() {
                self.settings.cases_dir.join(path)
            } else {
                path.to_path_buf()
            };
            let bytes = std::fs::read(&resolved).map_err(|err| {
                EngineError::new(ErrorKind::Http, OP, "failed to read request body file")
                    .with("file", resolved.display().to_string())
                    .with("error", err.to_string())
            })?;
            PreparedBody::Raw(bytes)
        } else if let Some(raw) = &step.request.body_raw {
            PreparedBody::Raw(raw.clone().into_bytes())
        } else if let Some(body) = &step.request.body {
            let rendered = render_value(body, ctx, opts)?;
            let bytes = serde_json::to_vec(&rendered).map_err(|err| {
                EngineError::new(ErrorKind::Http, OP, "failed to marshal request body")
                    .with("error", err.to_string())
            })?;
            PreparedBody::Json(bytes)
        } else {
            PreparedBody::Empty
        };

        Ok(PreparedRequest {
            method: step.request.method.clone(),
            path,
            headers,
            body,
        })
    }

    /// Flatten the response body into the context under
    /// `<stepName>.response.` when the body is JSON: decided by the actual
    /// `Content-Type`, falling back to the expected one.
    fn extract_response(
        &self,
        step: &Step,
        step_name: &str,
        ctx: &mut Context,
        response: &RecordedResponse,
    ) -> EngineResult<()> {
        const OP: &str = "extract_response";

        let content_type = response.content_type().map(str::to_string).or_else(|| {
            step.response.headers.as_ref().and_then(|headers| {
                headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                    .map(|(_, value)| value.clone())
            })
        });

        let is_json = content_type.is_some_and(|ct| ct.starts_with("application/json"));
        if !is_json || response.body.is_empty() {
            return Ok(());
        }

        let parsed: Value = serde_json::from_slice(&response.body).map_err(|err| {
            EngineError::new(ErrorKind::Http, OP, "response body is not valid JSON")
                .with("step", step_name)
                .with("error", err.to_string())
                .with("!body", response.body_text().replace('\n', " "))
        })?;

        ctx.extract_fields(&format!("{step_name}.response"), &parsed);
        Ok(())
    }

    async fn run_db_checks(
        &self,
        step: &Step,
        step_name: &str,
        ctx: &Context,
        db: &LazyDb,
    ) -> EngineResult<()> {
        const OP: &str = "db_check";

        for check in &step.db_checks {
            let query = render_str(&check.query, ctx, self.settings.render)?;
            let expected = render_value(&check.result, ctx, self.settings.render)?;

            let conn = db.get().await?;
            let rows = conn.query_rows(&query).await.map_err(|err| {
                EngineError::new(ErrorKind::Database, OP, "query failed")
                    .with("step", step_name)
                    .with("error", err.to_string())
                    .with("!query", query.clone())
            })?;

            let mismatches = match_rows(&expected, &rows);
            if !mismatches.is_empty() {
                return Err(EngineError::new(ErrorKind::Database, OP, "result mismatch")
                    .with("step", step_name)
                    .with("mismatches", mismatches.join("; "))
                    .with("!query", query));
            }
        }

        Ok(())
    }
}
