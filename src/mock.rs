//! Mock HTTP servers with call recording.
//!
//! A [`MockManager`] owns real listening servers on ephemeral loopback
//! ports. Each server routes `(method, path)` pairs to canned responses
//! through a table that cases extend dynamically, and records every matched
//! call in an append-only [`Spy`] log. The spy is never reset by the engine;
//! cases verify counts cumulatively within their scope.

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::Router;
use http::header::CONTENT_TYPE;
use http::{HeaderName, HeaderValue, Request, StatusCode};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::{MockCallCheck, MockResponseSpec, MockRoute, MockServerDef};

/// One recorded request, immutable once appended. Multi-valued headers are
/// joined with `, `; the body is the raw bytes read as UTF-8.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Mutex-guarded append-only call log shared between the serving path and
/// the assertion path. Hands out snapshots, never the internal storage.
#[derive(Debug, Clone, Default)]
pub struct Spy {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl Spy {
    fn record(&self, call: MockCall) {
        self.calls.lock().expect("spy lock poisoned").push(call);
    }

    pub fn snapshot(&self) -> Vec<MockCall> {
        self.calls.lock().expect("spy lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().expect("spy lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Routing table for one mock: `(method, path)` to canned response, where
/// later registrations override earlier ones.
#[derive(Debug, Clone)]
pub struct DynamicMockRouter {
    name: String,
    routes: Arc<RwLock<HashMap<(String, String), MockResponseSpec>>>,
    spy: Spy,
}

impl DynamicMockRouter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: Arc::new(RwLock::new(HashMap::new())),
            spy: Spy::default(),
        }
    }

    /// Register a route, rejecting statuses outside the valid HTTP range
    /// so malformed case data fails at registration instead of panicking
    /// inside the serving task.
    pub fn add_route(&self, route: MockRoute) -> EngineResult<()> {
        const OP: &str = "add_mock_route";

        if !(100..=999).contains(&route.response.status) {
            return Err(
                EngineError::new(ErrorKind::InvalidInput, OP, "mock route status out of range")
                    .with("mock", self.name.clone())
                    .with("method", route.method.clone())
                    .with("path", route.path.clone())
                    .with("status", route.response.status),
            );
        }

        let key = (route.method.to_uppercase(), route.path.clone());
        self.routes
            .write()
            .expect("route table lock poisoned")
            .insert(key, route.response);
        Ok(())
    }

    pub fn spy(&self) -> Spy {
        self.spy.clone()
    }

    /// Serve one request: on a route match, record the call and write the
    /// canned response; otherwise 404 without recording.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        let method = req.method().as_str().to_uppercase();
        let path = req.uri().path().to_string();

        let canned = {
            let routes = self.routes.read().expect("route table lock poisoned");
            routes.get(&(method.clone(), path.clone())).cloned()
        };

        let Some(canned) = canned else {
            debug!(mock = %self.name, %method, %path, "no mock route matched");
            return Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::empty())
                .expect("static response");
        };

        let mut headers = HashMap::new();
        for name in req.headers().keys() {
            let joined = req
                .headers()
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            headers.insert(name.to_string(), joined);
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(err) => {
                warn!(mock = %self.name, error = %err, "failed to read mock request body");
                String::new()
            }
        };

        debug!(mock = %self.name, %method, %path, "mock called");
        self.spy.record(MockCall {
            method,
            path,
            headers,
            body,
        });

        let mut builder = Response::builder().status(canned.status);
        for (name, value) in &canned.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                builder = builder.header(name, value);
            }
        }

        let response = if let Some(json) = &canned.json {
            builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(Body::from(json.to_string()))
        } else if let Some(body) = &canned.body {
            builder.body(Body::from(body.clone()))
        } else {
            builder.body(Body::empty())
        };

        match response {
            Ok(response) => response,
            Err(err) => {
                warn!(mock = %self.name, error = %err, "failed to build canned response");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())
                    .expect("static response")
            }
        }
    }
}

/// A live mock: its name, reachable base URL, and routing table.
#[derive(Debug, Clone)]
pub struct MockInstance {
    pub name: String,
    pub base_url: String,
    router: DynamicMockRouter,
}

impl MockInstance {
    pub fn add_route(&self, route: MockRoute) -> EngineResult<()> {
        self.router.add_route(route)
    }

    pub fn spy(&self) -> Spy {
        self.router.spy()
    }
}

/// Owns the lifecycle of the actual listening mock servers.
pub struct MockManager {
    instances: Vec<MockInstance>,
    shutdowns: Vec<oneshot::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl MockManager {
    /// Bind one server per definition on an ephemeral loopback port and
    /// register its initial routes.
    pub async fn start(defs: HashMap<String, MockServerDef>) -> EngineResult<Self> {
        const OP: &str = "start_mock_manager";

        let mut manager = Self {
            instances: Vec::with_capacity(defs.len()),
            shutdowns: Vec::with_capacity(defs.len()),
            handles: Vec::with_capacity(defs.len()),
        };

        for (name, def) in defs {
            let router = DynamicMockRouter::new(&name);
            for route in def.routes {
                router.add_route(route)?;
            }

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .map_err(|err| {
                    EngineError::new(ErrorKind::Mock, OP, "failed to bind mock listener")
                        .with("mock", name.clone())
                        .with("error", err.to_string())
                })?;
            let addr = listener.local_addr().map_err(|err| {
                EngineError::new(ErrorKind::Mock, OP, "failed to resolve mock address")
                    .with("mock", name.clone())
                    .with("error", err.to_string())
            })?;

            let app = Router::new()
                .fallback(serve_mock)
                .with_state(router.clone());

            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let server = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                });
            let server_name = name.clone();
            let handle = tokio::spawn(async move {
                if let Err(err) = server.await {
                    warn!(mock = %server_name, error = %err, "mock server error");
                }
            });

            manager.instances.push(MockInstance {
                name,
                base_url: format!("http://{addr}"),
                router,
            });
            manager.shutdowns.push(shutdown_tx);
            manager.handles.push(handle);
        }

        Ok(manager)
    }

    pub fn instance(&self, name: &str) -> Option<&MockInstance> {
        self.instances.iter().find(|inst| inst.name == name)
    }

    pub fn url(&self, name: &str) -> Option<&str> {
        self.instance(name).map(|inst| inst.base_url.as_str())
    }

    pub fn instances(&self) -> &[MockInstance] {
        &self.instances
    }

    /// Shut every server down gracefully.
    pub async fn stop_all(mut self) {
        for tx in self.shutdowns.drain(..) {
            let _ = tx.send(());
        }
        for handle in self.handles.drain(..) {
            if !handle.is_finished() {
                let _ = handle.await;
            }
        }
    }
}

impl Drop for MockManager {
    fn drop(&mut self) {
        for tx in self.shutdowns.drain(..) {
            let _ = tx.send(());
        }
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

async fn serve_mock(State(router): State<DynamicMockRouter>, req: Request<Body>) -> Response {
    router.handle(req).await
}

/// Evaluate the case's final mock-call expectations against the recorded
/// spies. Every expectation is evaluated; failures are collected rather
/// than short-circuited.
pub fn assert_mock_calls(
    checks: &[MockCallCheck],
    spies: &HashMap<String, Spy>,
) -> Vec<EngineError> {
    const OP: &str = "assert_mock_calls";

    let mut failures = Vec::new();

    for check in checks {
        let Some(spy) = spies.get(&check.mock) else {
            failures.push(
                EngineError::new(ErrorKind::Mock, OP, "mock not found")
                    .with("mock", check.mock.clone()),
            );
            continue;
        };

        let matched = spy
            .snapshot()
            .iter()
            .filter(|call| {
                if let Some(method) = &check.expect.method {
                    if !call.method.eq_ignore_ascii_case(method) {
                        return false;
                    }
                }
                if let Some(path) = &check.expect.path {
                    if &call.path != path {
                        return false;
                    }
                }
                if let Some(needle) = &check.expect.body.contains {
                    if !call.body.contains(needle) {
                        return false;
                    }
                }
                true
            })
            .count();

        if matched != check.count {
            failures.push(
                EngineError::new(ErrorKind::Mock, OP, "unexpected number of matching calls")
                    .with("mock", check.mock.clone())
                    .with("expected", check.count)
                    .with("actual", matched),
            );
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockBodyExpect;
    use serde_json::json;

    fn route(method: &str, path: &str, status: u16, json: Option<serde_json::Value>) -> MockRoute {
        MockRoute {
            method: method.to_string(),
            path: path.to_string(),
            response: MockResponseSpec {
                status,
                headers: HashMap::new(),
                json,
                body: None,
            },
        }
    }

    fn request(method: &str, path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .header("X-One", "a")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn matched_route_records_and_responds() {
        let router = DynamicMockRouter::new("notif");
        router
            .add_route(route("POST", "/send", 202, Some(json!({"status": "queued"}))))
            .unwrap();

        let res = router.handle(request("POST", "/send", r#"{"to":"Alice"}"#)).await;
        assert_eq!(res.status(), 202);
        assert_eq!(
            res.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let calls = router.spy().snapshot();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].path, "/send");
        assert_eq!(calls[0].body, r#"{"to":"Alice"}"#);
        assert_eq!(calls[0].headers.get("x-one").map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn unmatched_route_returns_404_without_recording() {
        let router = DynamicMockRouter::new("notif");
        router.add_route(route("POST", "/send", 202, None)).unwrap();

        let res = router.handle(request("GET", "/send", "")).await;
        assert_eq!(res.status(), 404);
        assert!(router.spy().is_empty());
    }

    #[tokio::test]
    async fn later_route_definition_overrides_earlier() {
        let router = DynamicMockRouter::new("notif");
        router.add_route(route("GET", "/status", 200, None)).unwrap();
        router.add_route(route("GET", "/status", 503, None)).unwrap();

        let res = router.handle(request("GET", "/status", "")).await;
        assert_eq!(res.status(), 503);
    }

    #[tokio::test]
    async fn plain_body_routes_do_not_force_content_type() {
        let router = DynamicMockRouter::new("raw");
        router
            .add_route(MockRoute {
                method: "GET".to_string(),
                path: "/text".to_string(),
                response: MockResponseSpec {
                    status: 200,
                    headers: HashMap::new(),
                    json: None,
                    body: Some("plain".to_string()),
                },
            })
            .unwrap();

        let res = router.handle(request("GET", "/text", "")).await;
        assert_eq!(res.status(), 200);
        assert!(res.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn out_of_range_status_is_rejected_at_registration() {
        let router = DynamicMockRouter::new("bad");
        let err = router.add_route(route("GET", "/x", 42, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("status out of range"));

        let err = router.add_route(route("GET", "/x", 0, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // nothing was registered, so the route still 404s
        assert!(router
            .routes
            .read()
            .expect("route table lock poisoned")
            .is_empty());
    }

    #[tokio::test]
    async fn manager_serves_over_real_sockets() {
        let defs = HashMap::from([(
            "notif".to_string(),
            MockServerDef {
                routes: vec![route("POST", "/send", 202, Some(json!({"ok": true})))],
            },
        )]);
        let manager = MockManager::start(defs).await.unwrap();
        let url = manager.url("notif").unwrap().to_string();

        let client = reqwest::Client::new();
        let res = client
            .post(format!("{url}/send"))
            .body("hello Alice")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 202);

        let spy = manager.instance("notif").unwrap().spy();
        assert_eq!(spy.len(), 1);
        assert_eq!(spy.snapshot()[0].body, "hello Alice");

        manager.stop_all().await;
    }

    #[test]
    fn mock_call_assertions_filter_and_count() {
        let spy = Spy::default();
        spy.record(MockCall {
            method: "POST".to_string(),
            path: "/send".to_string(),
            headers: HashMap::new(),
            body: r#"{"to":"Alice"}"#.to_string(),
        });
        spy.record(MockCall {
            method: "POST".to_string(),
            path: "/send".to_string(),
            headers: HashMap::new(),
            body: r#"{"to":"Bob"}"#.to_string(),
        });

        let spies = HashMap::from([("notif".to_string(), spy)]);

        let check = |count: usize, contains: Option<&str>| MockCallCheck {
            mock: "notif".to_string(),
            count,
            expect: crate::model::MockCallExpect {
                method: Some("POST".to_string()),
                path: Some("/send".to_string()),
                body: MockBodyExpect {
                    contains: contains.map(str::to_string),
                },
            },
        };

        assert!(assert_mock_calls(&[check(1, Some("Alice"))], &spies).is_empty());
        assert!(assert_mock_calls(&[check(2, None)], &spies).is_empty());

        let failures = assert_mock_calls(&[check(3, None)], &spies);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind(), ErrorKind::Mock);
    }

    #[test]
    fn missing_mock_fails_but_other_checks_still_run() {
        let spies = HashMap::from([("real".to_string(), Spy::default())]);
        let checks = vec![
            MockCallCheck {
                mock: "ghost".to_string(),
                count: 1,
                expect: Default::default(),
            },
            MockCallCheck {
                mock: "real".to_string(),
                count: 0,
                expect: Default::default(),
            },
        ];
        let failures = assert_mock_calls(&checks, &spies);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("ghost"));
    }
}
