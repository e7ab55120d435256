//! gluon — declarative integration testing for HTTP services.
//!
//! Test cases are YAML data: each case loads database fixtures, walks a
//! list of HTTP steps against the handler under test (dispatched in-memory,
//! no sockets), and asserts responses, database state, and the traffic
//! recorded by managed mock servers. Values captured from one step's
//! response feed the templates of the next through a per-case context.
//!
//! The host embeds the engine in an ordinary `#[tokio::test]`:
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! let mocks = gluon::MockManager::start(Default::default()).await?;
//!
//! let mut cfg = gluon::Config::new(my_app::router(), "tests/cases");
//! cfg.mock_manager = Some(std::sync::Arc::new(mocks));
//!
//! let results = gluon::run(&cfg).await?;
//! assert!(results.iter().all(|r| r.passed()));
//! # Ok(())
//! # }
//! # mod my_app { pub fn router() -> axum::Router { axum::Router::new() } }
//! ```

pub mod assert;
pub mod condition;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod duration;
pub mod error;
pub mod hooks;
pub mod junit;
pub mod loader;
pub mod mock;
pub mod model;
pub mod path;
pub mod perf;
pub mod render;
pub mod retry;
pub mod runner;
pub mod schema;
pub mod suite;

pub use db::{DbConn, DbConnector, DbType, FixtureConfig, FixtureLoader};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use loader::load_cases;
pub use mock::{MockCall, MockInstance, MockManager, Spy};
pub use model::{CaseResult, TestCase};
pub use render::{RenderMode, RenderOptions};
pub use runner::{CaseRunner, ReqCallback, RunSettings};
pub use suite::{run, Config};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
