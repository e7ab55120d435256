//! Database and fixture-loader seams.
//!
//! The engine never speaks a wire protocol itself: the host supplies a
//! [`DbConnector`] that opens connections and a [`FixtureLoader`] that
//! populates tables from fixture files. Query results always marshal as an
//! ordered array of column→value maps so the wildcard matcher can compare
//! them to expected JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{EngineError, EngineResult, ErrorKind};

/// The flavor of relational database fixtures are loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[default]
    Postgres,
    Mysql,
}

/// Parameters handed to the fixture loader for one fixture file.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file: PathBuf,
    pub conn_str: String,
    pub db_type: DbType,
    pub truncate: bool,
    pub reset_seq: bool,
    pub dry_run: bool,
}

impl FixtureConfig {
    /// Deterministic defaults: truncate and reset sequences before
    /// inserting, never dry-run.
    pub fn new(file: PathBuf, conn_str: impl Into<String>, db_type: DbType) -> Self {
        Self {
            file,
            conn_str: conn_str.into(),
            db_type,
            truncate: true,
            reset_seq: true,
            dry_run: false,
        }
    }
}

/// An open database connection used for db checks and SQL hooks.
#[async_trait]
pub trait DbConn: Send + Sync {
    /// Run a query and marshal the result set as ordered rows of
    /// column→value maps.
    async fn query_rows(&self, query: &str) -> anyhow::Result<Vec<Map<String, Value>>>;

    /// Execute a statement, discarding any result.
    async fn execute(&self, statement: &str) -> anyhow::Result<()>;
}

/// Opens connections from a connection string.
#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(&self, conn_str: &str) -> anyhow::Result<Box<dyn DbConn>>;
}

/// Loads one fixture file into the database; the engine does not interpret
/// fixture contents.
#[async_trait]
pub trait FixtureLoader: Send + Sync {
    async fn load(&self, cfg: &FixtureConfig) -> anyhow::Result<()>;
}

/// A per-case database handle: opened on first use, reused for the rest of
/// the case, dropped at case exit.
pub(crate) struct LazyDb {
    connector: Option<Arc<dyn DbConnector>>,
    conn_str: Option<String>,
    conn: OnceCell<Box<dyn DbConn>>,
}

impl LazyDb {
    pub fn new(connector: Option<Arc<dyn DbConnector>>, conn_str: Option<String>) -> Self {
        Self {
            connector,
            conn_str,
            conn: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> EngineResult<&dyn DbConn> {
        const OP: &str = "open_database";

        let (Some(connector), Some(conn_str)) = (&self.connector, &self.conn_str) else {
            return Err(EngineError::new(
                ErrorKind::Database,
                OP,
                "database connection not configured",
            ));
        };

        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("opening database connection");
                connector.connect(conn_str).await.map_err(|err| {
                    EngineError::new(ErrorKind::Database, OP, "failed to open connection")
                        .with("error", err.to_string())
                })
            })
            .await?;

        Ok(conn.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        connects: Arc<AtomicUsize>,
    }

    struct NullConn;

    #[async_trait]
    impl DbConn for NullConn {
        async fn query_rows(&self, _query: &str) -> anyhow::Result<Vec<Map<String, Value>>> {
            Ok(Vec::new())
        }

        async fn execute(&self, _statement: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl DbConnector for CountingConnector {
        async fn connect(&self, _conn_str: &str) -> anyhow::Result<Box<dyn DbConn>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullConn))
        }
    }

    #[tokio::test]
    async fn lazy_db_connects_once_and_reuses() {
        let connects = Arc::new(AtomicUsize::new(0));
        let lazy = LazyDb::new(
            Some(Arc::new(CountingConnector {
                connects: connects.clone(),
            })),
            Some("postgres://localhost/test".to_string()),
        );

        assert_eq!(connects.load(Ordering::SeqCst), 0, "connection is lazy");
        lazy.get().await.unwrap();
        lazy.get().await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconfigured_database_is_a_database_error() {
        let lazy = LazyDb::new(None, None);
        let err = match lazy.get().await {
            Ok(_) => panic!("expected database error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::Database);
    }

    #[test]
    fn fixture_config_defaults_are_deterministic() {
        let cfg = FixtureConfig::new(
            PathBuf::from("fixtures/users.yml"),
            "postgres://localhost/test",
            DbType::Postgres,
        );
        assert!(cfg.truncate);
        assert!(cfg.reset_seq);
        assert!(!cfg.dry_run);
    }

    #[test]
    fn db_type_deserializes_lowercase() {
        let t: DbType = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(t, DbType::Postgres);
        let t: DbType = serde_json::from_str("\"mysql\"").unwrap();
        assert_eq!(t, DbType::Mysql);
    }
}
