//! In-memory request dispatch.
//!
//! Steps and HTTP hooks never open a socket: the rendered request is built
//! as an `http::Request` and sent straight through the user's router, with
//! the response recorded wholesale. The wall-clock duration of the call is
//! measured here and nowhere else.

use axum::body::Body;
use axum::Router;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use http_body_util::BodyExt;
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tower::ServiceExt;
use tracing::debug;

use crate::error::{EngineError, EngineResult, ErrorKind};

/// A fully rendered request, ready to dispatch any number of times.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: PreparedBody,
}

/// Request payload variants; `Json` additionally implies an
/// `application/json` content type unless the author set one.
#[derive(Debug, Clone)]
pub enum PreparedBody {
    Empty,
    Json(Vec<u8>),
    Raw(Vec<u8>),
}

/// Everything the recorder captured about one handler invocation.
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub duration: Duration,
}

impl RecordedResponse {
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }
}

/// Dispatch a prepared request through the handler and record the response.
pub async fn dispatch(handler: &Router, req: &PreparedRequest) -> EngineResult<RecordedResponse> {
    const OP: &str = "dispatch_request";

    let method = Method::from_bytes(req.method.as_bytes()).map_err(|_| {
        EngineError::new(ErrorKind::InvalidInput, OP, "invalid request method")
            .with("method", req.method.clone())
    })?;

    let mut builder = Request::builder().method(method).uri(&req.path);

    let mut has_content_type = false;
    for (name, value) in &req.headers {
        let name = HeaderName::try_from(name.as_str()).map_err(|_| {
            EngineError::new(ErrorKind::Http, OP, "invalid header name")
                .with("header", name.clone())
        })?;
        let value = HeaderValue::try_from(value.as_str()).map_err(|_| {
            EngineError::new(ErrorKind::Http, OP, "invalid header value")
                .with("header", name.to_string())
        })?;
        has_content_type |= name == CONTENT_TYPE;
        builder = builder.header(name, value);
    }

    if matches!(req.body, PreparedBody::Json(_)) && !has_content_type {
        builder = builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    let body = match &req.body {
        PreparedBody::Empty => Body::empty(),
        PreparedBody::Json(bytes) | PreparedBody::Raw(bytes) => Body::from(bytes.clone()),
    };

    let request = builder.body(body).map_err(|err| {
        EngineError::new(ErrorKind::Http, OP, "failed to build request")
            .with("path", req.path.clone())
            .with("error", err.to_string())
    })?;

    debug!(method = %req.method, path = %req.path, "dispatching request");

    let started = Instant::now();
    let response = handler
        .clone()
        .oneshot(request)
        .await
        .map_err(|err| match err {})?;

    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|err| {
            EngineError::new(ErrorKind::Http, OP, "failed to read response body")
                .with("path", req.path.clone())
                .with("error", err.to_string())
        })?
        .to_bytes()
        .to_vec();
    let duration = started.elapsed();

    debug!(status, elapsed_ms = duration.as_millis() as u64, "recorded response");

    Ok(RecordedResponse {
        status,
        headers,
        body,
        duration,
    })
}
