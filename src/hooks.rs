//! Setup and teardown hooks.
//!
//! A hook is either a SQL statement executed on the case's database
//! connection or an HTTP request dispatched in-memory to the real handler
//! under test. HTTP hooks fail on status 400 and above.

use axum::Router;
use std::fmt;
use tracing::debug;

use crate::context::Context;
use crate::db::LazyDb;
use crate::dispatch::{dispatch, PreparedBody, PreparedRequest};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::Hook;
use crate::render::{render_str, render_value, RenderOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Setup,
    Teardown,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Setup => f.write_str("setup"),
            HookKind::Teardown => f.write_str("teardown"),
        }
    }
}

/// Executes hook lists against the case's database handle and handler.
pub(crate) struct HookExecutor<'a> {
    db: &'a LazyDb,
    handler: &'a Router,
    render: RenderOptions,
}

impl<'a> HookExecutor<'a> {
    pub fn new(db: &'a LazyDb, handler: &'a Router, render: RenderOptions) -> Self {
        Self {
            db,
            handler,
            render,
        }
    }

    /// Run hooks in declared order, stopping at the first failure.
    pub async fn execute_hooks(
        &self,
        hooks: &[Hook],
        kind: HookKind,
        ctx: &Context,
    ) -> EngineResult<()> {
        for (i, hook) in hooks.iter().enumerate() {
            let label = hook
                .name
                .clone()
                .unwrap_or_else(|| format!("{kind} hook #{}", i + 1));

            debug!(hook = %label, "executing hook");
            self.execute_hook(hook, &label, ctx).await.map_err(|err| {
                err.with("hook", label.clone()).with("kind", kind.to_string())
            })?;
        }

        Ok(())
    }

    async fn execute_hook(&self, hook: &Hook, label: &str, ctx: &Context) -> EngineResult<()> {
        const OP: &str = "execute_hook";

        if let Some(sql) = &hook.sql {
            let rendered = render_str(sql, ctx, self.render)?;
            let conn = self.db.get().await?;
            return conn.execute(&rendered).await.map_err(|err| {
                EngineError::new(ErrorKind::Database, OP, "SQL hook failed")
                    .with("error", err.to_string())
                    .with("!query", rendered)
            });
        }

        if let Some(http) = &hook.http {
            let mut headers = std::collections::HashMap::new();
            for (name, value) in &http.headers {
                headers.insert(name.clone(), render_str(value, ctx, self.render)?);
            }

            let body = match &http.body {
                Some(body) => {
                    let rendered = render_value(body, ctx, self.render)?;
                    let bytes = serde_json::to_vec(&rendered).map_err(|err| {
                        EngineError::new(ErrorKind::Http, OP, "failed to marshal hook body")
                            .with("error", err.to_string())
                    })?;
                    PreparedBody::Json(bytes)
                }
                None => PreparedBody::Empty,
            };

            let request = PreparedRequest {
                method: http.method.clone(),
                path: render_str(&http.path, ctx, self.render)?,
                headers,
                body,
            };

            let response = dispatch(self.handler, &request).await?;
            if response.status >= 400 {
                return Err(
                    EngineError::new(ErrorKind::Http, OP, "hook request returned error status")
                        .with("status", response.status)
                        .with("path", request.path)
                        .with("!body", response.body_text().replace('\n', " ")),
                );
            }
            return Ok(());
        }

        Err(EngineError::new(
            ErrorKind::InvalidInput,
            OP,
            "hook has no action defined",
        )
        .with("hook", label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbConn, DbConnector};
    use crate::model::HttpHookSpec;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::{json, Map, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedDb {
        statements: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DbConn for ScriptedDb {
        async fn query_rows(&self, _query: &str) -> anyhow::Result<Vec<Map<String, Value>>> {
            Ok(Vec::new())
        }

        async fn execute(&self, statement: &str) -> anyhow::Result<()> {
            self.statements.lock().unwrap().push(statement.to_string());
            Ok(())
        }
    }

    struct ScriptedConnector {
        statements: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DbConnector for ScriptedConnector {
        async fn connect(&self, _conn_str: &str) -> anyhow::Result<Box<dyn DbConn>> {
            Ok(Box::new(ScriptedDb {
                statements: self.statements.clone(),
            }))
        }
    }

    fn lazy_db(statements: Arc<Mutex<Vec<String>>>) -> LazyDb {
        LazyDb::new(
            Some(Arc::new(ScriptedConnector { statements })),
            Some("postgres://localhost/test".to_string()),
        )
    }

    fn sql_hook(sql: &str) -> Hook {
        Hook {
            name: None,
            sql: Some(sql.to_string()),
            http: None,
        }
    }

    fn http_hook(method: &str, path: &str, body: Option<Value>) -> Hook {
        Hook {
            name: Some("reset".to_string()),
            sql: None,
            http: Some(HttpHookSpec {
                method: method.to_string(),
                path: path.to_string(),
                headers: HashMap::new(),
                body,
            }),
        }
    }

    #[tokio::test]
    async fn sql_hooks_render_and_execute_in_order() {
        let statements = Arc::new(Mutex::new(Vec::new()));
        let db = lazy_db(statements.clone());
        let handler = Router::new();
        let executor = HookExecutor::new(&db, &handler, RenderOptions::default());

        let mut ctx = Context::empty();
        ctx.insert("tenant", "acme");

        executor
            .execute_hooks(
                &[
                    sql_hook("DELETE FROM sessions WHERE tenant = '{{tenant}}'"),
                    sql_hook("DELETE FROM audit_log"),
                ],
                HookKind::Setup,
                &ctx,
            )
            .await
            .unwrap();

        let recorded = statements.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                "DELETE FROM sessions WHERE tenant = 'acme'".to_string(),
                "DELETE FROM audit_log".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn http_hook_hits_the_real_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        let handler = Router::new().route(
            "/internal/reset",
            post(move |body: String| {
                let seen = seen_in_handler.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    StatusCode::NO_CONTENT
                }
            }),
        );

        let db = LazyDb::new(None, None);
        let executor = HookExecutor::new(&db, &handler, RenderOptions::default());
        let mut ctx = Context::empty();
        ctx.insert("tenant", "acme");

        executor
            .execute_hooks(
                &[http_hook(
                    "POST",
                    "/internal/reset",
                    Some(json!({"tenant": "{{tenant}}"})),
                )],
                HookKind::Setup,
                &ctx,
            )
            .await
            .unwrap();

        let bodies = seen.lock().unwrap().clone();
        assert_eq!(bodies, vec![r#"{"tenant":"acme"}"#.to_string()]);
    }

    #[tokio::test]
    async fn http_hook_fails_on_error_status() {
        let handler = Router::new().route(
            "/broken",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let db = LazyDb::new(None, None);
        let executor = HookExecutor::new(&db, &handler, RenderOptions::default());

        let err = executor
            .execute_hooks(
                &[http_hook("POST", "/broken", None)],
                HookKind::Teardown,
                &Context::empty(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Http);
        assert!(err.to_string().contains("error status"));
    }

    #[tokio::test]
    async fn sql_hook_without_database_fails() {
        let db = LazyDb::new(None, None);
        let handler = Router::new();
        let executor = HookExecutor::new(&db, &handler, RenderOptions::default());

        let err = executor
            .execute_hooks(&[sql_hook("SELECT 1")], HookKind::Setup, &Context::empty())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Database);
    }

    #[tokio::test]
    async fn empty_hook_is_invalid() {
        let db = LazyDb::new(None, None);
        let handler = Router::new();
        let executor = HookExecutor::new(&db, &handler, RenderOptions::default());

        let hook = Hook {
            name: None,
            sql: None,
            http: None,
        };
        let err = executor
            .execute_hooks(&[hook], HookKind::Setup, &Context::empty())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
