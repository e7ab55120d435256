//! Case-file data model.
//!
//! A case file is a YAML array of [`TestCase`] values. Everything here is
//! immutable once loaded; unknown keys are ignored by deserialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::schema::JsonSchema;

/// One declarative scenario: the unit of orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub name: String,
    /// Case-level variables merged over the process environment.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Fixture names, loaded in declared order before the first step.
    #[serde(default)]
    pub fixtures: Vec<String>,
    /// Routes to register on named mock instances for this case.
    #[serde(default)]
    pub mock_servers: HashMap<String, MockServerDef>,
    #[serde(default)]
    pub setup: Vec<Hook>,
    #[serde(default)]
    pub teardown: Vec<Hook>,
    /// Expectations over recorded mock traffic, checked after the last step.
    #[serde(default)]
    pub mock_calls: Vec<MockCallCheck>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One HTTP request plus its assertions within a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    /// Condition string; a falsy result skips the step.
    #[serde(default)]
    pub when: Option<String>,
    /// Loop over items or a numeric range.
    #[serde(default, rename = "loop")]
    pub looping: Option<LoopSpec>,
    #[serde(default)]
    pub retry: Option<RetrySpec>,
    pub request: RequestSpec,
    #[serde(default)]
    pub response: ResponseSpec,
    #[serde(default)]
    pub performance: Option<PerformanceSpec>,
    #[serde(default)]
    pub db_checks: Vec<DbCheck>,
}

/// Loop configuration: `items` + `var`, or a numeric `range`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSpec {
    #[serde(default)]
    pub items: Vec<Value>,
    /// Name the current item is bound to inside the iteration context.
    #[serde(default)]
    pub var: Option<String>,
    #[serde(default)]
    pub range: Option<RangeSpec>,
}

/// Inclusive numeric range; `step` defaults to 1 and may be negative when
/// `from > to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSpec {
    pub from: i64,
    pub to: i64,
    #[serde(default)]
    pub step: i64,
}

/// Retry configuration for a step's dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    /// Maximum number of attempts, including the first try.
    pub attempts: u32,
    /// `constant`, `linear` or `exponential` (default).
    #[serde(default)]
    pub backoff: Option<String>,
    #[serde(default)]
    pub initial_delay: Option<String>,
    #[serde(default)]
    pub max_delay: Option<String>,
    /// Retry only on these status codes.
    #[serde(default)]
    pub retry_on: Vec<u16>,
    /// Retry on transport-level errors as well.
    #[serde(default)]
    pub retry_on_error: bool,
}

/// Post-hoc performance thresholds for a step's dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSpec {
    #[serde(default)]
    pub max_duration: Option<String>,
    #[serde(default)]
    pub warn_duration: Option<String>,
    #[serde(default)]
    pub fail_on_warning: bool,
}

/// The HTTP request a step performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Structured body, rendered recursively and sent as JSON.
    #[serde(default)]
    pub body: Option<Value>,
    /// Path to a file whose raw contents become the body.
    #[serde(default)]
    pub body_file: Option<String>,
    /// Literal body string, sent verbatim.
    #[serde(default)]
    pub body_raw: Option<String>,
}

/// Expected response: status, headers and one of several body shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    #[serde(default = "default_status")]
    pub status: u16,
    /// Expected headers; `None` means no headers map was declared, which
    /// is distinct from an empty map for content-type auto-injection.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Expected JSON body with `<<PRESENCE>>` wildcard support.
    #[serde(default)]
    pub json: Option<Value>,
    /// Expected exact text body.
    #[serde(default)]
    pub text: Option<String>,
    /// Path to a JSON-Schema file validated against the body.
    #[serde(default)]
    pub schema: Option<String>,
    /// Inline JSON-Schema validated against the body.
    #[serde(default)]
    pub json_schema: Option<JsonSchema>,
    /// Path/operator assertions over the parsed body.
    #[serde(default)]
    pub assertions: Vec<ResponseAssertion>,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: None,
            json: None,
            text: None,
            schema: None,
            json_schema: None,
            assertions: Vec::new(),
        }
    }
}

fn default_status() -> u16 {
    200
}

/// One path/operator assertion over a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseAssertion {
    /// JSONPath subset, e.g. `data.items[0].id`.
    pub path: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    /// Optional human-readable message prefixed to failures.
    #[serde(default)]
    pub message: Option<String>,
}

/// A rendered SQL query and the JSON rows it must return.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCheck {
    pub query: String,
    /// Expected rows as an array of column→value maps, with
    /// `<<PRESENCE>>` wildcard support.
    pub result: Value,
}

/// Routes served by one named mock for the duration of a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockServerDef {
    #[serde(default)]
    pub routes: Vec<MockRoute>,
}

/// A single canned route; method+path is unique within a mock and later
/// definitions override earlier ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockRoute {
    pub method: String,
    pub path: String,
    pub response: MockResponseSpec,
}

/// The canned response a mock route serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponseSpec {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON payload; forces `Content-Type: application/json`.
    #[serde(default)]
    pub json: Option<Value>,
    /// Literal payload.
    #[serde(default)]
    pub body: Option<String>,
}

/// Final expectation over one mock's recorded calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockCallCheck {
    pub mock: String,
    pub count: usize,
    #[serde(default)]
    pub expect: MockCallExpect,
}

/// Filters a [`MockCallCheck`] applies to each recorded call; empty filters
/// match every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockCallExpect {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub body: MockBodyExpect,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockBodyExpect {
    /// Substring the call body must contain.
    #[serde(default)]
    pub contains: Option<String>,
}

/// A setup or teardown action: a SQL statement or an HTTP request against
/// the handler under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub http: Option<HttpHookSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpHookSpec {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Outcome of one case: name, wall-clock duration, and an error text when
/// the case failed.
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn case_deserializes_from_yaml() {
        let yaml = r#"
name: create user
variables:
  role: admin
fixtures:
  - users
mockServers:
  notif:
    routes:
      - method: POST
        path: /send
        response:
          status: 202
          json: {"status": "queued"}
steps:
  - name: create
    request:
      method: POST
      path: /users
      body: {"name": "Alice", "role": "{{role}}"}
    response:
      status: 201
      json: {"id": "<<PRESENCE>>", "name": "Alice"}
    dbChecks:
      - query: SELECT count(*) AS cnt FROM users
        result: [{"cnt": 1}]
mockCalls:
  - mock: notif
    count: 1
    expect:
      method: POST
      path: /send
      body:
        contains: Alice
"#;
        let case: TestCase = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(case.name, "create user");
        assert_eq!(case.variables["role"], json!("admin"));
        assert_eq!(case.fixtures, vec!["users"]);
        assert_eq!(case.mock_servers["notif"].routes.len(), 1);
        assert_eq!(case.steps.len(), 1);
        assert_eq!(case.steps[0].response.status, 201);
        assert_eq!(case.steps[0].db_checks.len(), 1);
        assert_eq!(case.mock_calls[0].count, 1);
        assert_eq!(
            case.mock_calls[0].expect.body.contains.as_deref(),
            Some("Alice")
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let yaml = r#"
name: tolerant
totallyUnknown: true
steps:
  - name: s
    bogus: 1
    request:
      method: GET
      path: /ping
"#;
        let case: TestCase = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(case.steps.len(), 1);
    }

    #[test]
    fn response_status_defaults_to_200() {
        let yaml = r#"
name: defaults
steps:
  - name: s
    request:
      method: GET
      path: /ping
"#;
        let case: TestCase = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(case.steps[0].response.status, 200);
        assert!(case.steps[0].response.headers.is_none());
    }

    #[test]
    fn loop_and_retry_deserialize() {
        let yaml = r#"
name: loops
steps:
  - name: s
    loop:
      items: [1, 2, 3]
      var: id
    retry:
      attempts: 3
      backoff: constant
      initialDelay: 10ms
      retryOn: [503]
    request:
      method: DELETE
      path: /users/{{id}}
"#;
        let case: TestCase = serde_yaml::from_str(yaml).unwrap();
        let step = &case.steps[0];
        let looping = step.looping.as_ref().unwrap();
        assert_eq!(looping.items.len(), 3);
        assert_eq!(looping.var.as_deref(), Some("id"));
        let retry = step.retry.as_ref().unwrap();
        assert_eq!(retry.attempts, 3);
        assert_eq!(retry.backoff.as_deref(), Some("constant"));
        assert_eq!(retry.retry_on, vec![503]);
    }

    #[test]
    fn empty_headers_map_differs_from_absent() {
        let with_map: ResponseSpec = serde_yaml::from_str("headers: {}").unwrap();
        assert_eq!(with_map.headers, Some(HashMap::new()));

        let without: ResponseSpec = serde_yaml::from_str("status: 200").unwrap();
        assert!(without.headers.is_none());
    }
}
