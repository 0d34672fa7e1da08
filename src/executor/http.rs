//! The `http` atomic executor: a templated request with retry policy and
//! response extraction. The wire-level transport itself is an external
//! collaborator — this module defines [`HttpTransport`], the seam a caller
//! plugs a real client into, and drives it with cooperative cancellation
//! and exponential retry on `retryOn` statuses and non-abort network
//! errors.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::executor::retry::RetryPolicy;
use crate::executor::Executor;
use crate::model::{ExecutionError, ExecutionMetadata, ExecutionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Json,
    Text,
    Blob,
}

#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponseSpec {
    pub status: u16,
    pub body: Value,
}

/// Network-error classification a transport reports when the request
/// never got an HTTP status (DNS failure, connection reset, ...) versus
/// cooperative abort (which must not be retried).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Aborted,
    Network(String),
}

/// The `http` executor's pluggable transport. A real implementation wraps
/// an HTTP client (`reqwest` or similar); tests use [`crate::testing`]'s
/// recorded-response stub.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: HttpRequestSpec,
        context: &ExecutionContext,
    ) -> Result<HttpResponseSpec, TransportError>;
}

/// Interpolate `{{input}}` and `{{var.NAME}}` placeholders, URL-encoding
/// substitutions. Used for the URL template, where spec §6 requires
/// encoding. Unknown `{{var.NAME}}` references resolve to the empty
/// string.
pub fn interpolate(template: &str, input: &str, variables: &serde_json::Map<String, Value>) -> String {
    interpolate_with(template, input, variables, true)
}

/// Interpolate `{{input}}` and `{{var.NAME}}` placeholders without
/// encoding substitutions. Used anywhere the rendered text is not itself
/// being inserted into a URL — the `http` request body and the `script`
/// executor's general-purpose template transform. Unknown `{{var.NAME}}`
/// references resolve to the empty string.
pub fn interpolate_plain(template: &str, input: &str, variables: &serde_json::Map<String, Value>) -> String {
    interpolate_with(template, input, variables, false)
}

fn interpolate_with(template: &str, input: &str, variables: &serde_json::Map<String, Value>, encode: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if template[i..].starts_with("{{") {
            if let Some(end) = template[i..].find("}}") {
                let token = template[i + 2..i + end].trim();
                let raw = if token == "input" {
                    input.to_string()
                } else if let Some(name) = token.strip_prefix("var.") {
                    variables.get(name.trim()).map(stringify_value).unwrap_or_default()
                } else {
                    String::new()
                };
                let replacement = if encode { urlencoding::encode(&raw).into_owned() } else { raw };
                out.push_str(&replacement);
                i += end + 2;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn stringify_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Dotted-path extraction with bracket indices, e.g. `data.items[0].id`.
pub fn extract_path(value: &Value, path: &str) -> Value {
    let mut current = value.clone();
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (name, indices) = parse_segment(segment);
        if !name.is_empty() {
            current = current.get(name).cloned().unwrap_or(Value::Null);
        }
        for idx in indices {
            current = current.get(idx).cloned().unwrap_or(Value::Null);
        }
    }
    current
}

fn parse_segment(segment: &str) -> (&str, Vec<usize>) {
    let mut indices = Vec::new();
    let base_end = segment.find('[').unwrap_or(segment.len());
    let name = &segment[..base_end];
    let mut rest = &segment[base_end..];
    while let Some(open) = rest.find('[') {
        if let Some(close) = rest[open..].find(']') {
            if let Ok(idx) = rest[open + 1..open + close].parse::<usize>() {
                indices.push(idx);
            }
            rest = &rest[open + close + 1..];
        } else {
            break;
        }
    }
    (name, indices)
}

pub struct HttpExecutor {
    id: String,
    method: String,
    url_template: String,
    body_template: Option<Value>,
    headers: HashMap<String, String>,
    response_type: ResponseType,
    extract: Option<String>,
    retry: RetryPolicy,
    transport: std::sync::Arc<dyn HttpTransport>,
}

impl HttpExecutor {
    pub fn new(id: impl Into<String>, url_template: impl Into<String>, transport: std::sync::Arc<dyn HttpTransport>) -> Self {
        Self {
            id: id.into(),
            method: "GET".to_string(),
            url_template: url_template.into(),
            body_template: None,
            headers: HashMap::new(),
            response_type: ResponseType::Json,
            extract: None,
            retry: RetryPolicy::default(),
            transport,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_body_template(mut self, body: Value) -> Self {
        self.body_template = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_extract_path(mut self, path: impl Into<String>) -> Self {
        self.extract = Some(path.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn render_body(&self, input: &str, variables: &serde_json::Map<String, Value>) -> Option<Value> {
        self.body_template.as_ref().map(|tmpl| interpolate_value(tmpl, input, variables))
    }
}

fn interpolate_value(value: &Value, input: &str, variables: &serde_json::Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_plain(s, input, variables)),
        Value::Array(arr) => Value::Array(arr.iter().map(|v| interpolate_value(v, input, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, input, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        context.check_cancelled()?;
        let start = chrono::Utc::now();
        let input_str = match &input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let variables = context.variables().to_object();
        let url = interpolate(&self.url_template, &input_str, &variables);
        let body = self.render_body(&input_str, &variables);

        let mut attempt = 1u32;
        loop {
            context.check_cancelled()?;
            let request = HttpRequestSpec {
                method: self.method.clone(),
                url: url.clone(),
                headers: self.headers.clone(),
                body: body.clone(),
            };
            match self.transport.send(request, context).await {
                Ok(response) if self.retry.should_retry_status(response.status) && attempt < self.retry.total_attempts() => {
                    tracing::warn!(status = response.status, attempt, "http executor retrying on status");
                    tokio::time::sleep(self.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
                Ok(response) if response.status >= 400 => {
                    let recoverable = self.retry.should_retry_status(response.status);
                    return Ok(ExecutionResult::failed(
                        Value::Null,
                        vec![ExecutionError::new(
                            "DRIVER_ERROR",
                            format!("http request failed with status {}", response.status),
                            recoverable,
                        )],
                    )
                    .with_metadata(metadata(&self.id, start)));
                }
                Ok(response) => {
                    let output = match self.response_type {
                        ResponseType::Json | ResponseType::Blob => response.body.clone(),
                        ResponseType::Text => Value::String(stringify_value(&response.body)),
                    };
                    let output = match &self.extract {
                        Some(path) => extract_path(&output, path),
                        None => output,
                    };
                    return Ok(ExecutionResult::success(output).with_metadata(metadata(&self.id, start)));
                }
                Err(TransportError::Aborted) => return Err(crate::KernelError::Cancelled),
                Err(TransportError::Network(message)) if attempt < self.retry.total_attempts() => {
                    tracing::warn!(message, attempt, "http executor retrying on network error");
                    tokio::time::sleep(self.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
                Err(TransportError::Network(message)) => {
                    return Ok(ExecutionResult::failed(
                        Value::Null,
                        vec![ExecutionError::new("DRIVER_ERROR", message, true)],
                    )
                    .with_metadata(metadata(&self.id, start)));
                }
            }
        }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

fn metadata(executor_id: &str, start: chrono::DateTime<chrono::Utc>) -> ExecutionMetadata {
    let end = chrono::Utc::now();
    ExecutionMetadata {
        executor_id: Some(executor_id.to_string()),
        executor_type: Some("http".to_string()),
        start_time: Some(start),
        end_time: Some(end),
        duration_ms: Some((end - start).num_milliseconds().max(0) as u64),
        retry_count: 0,
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn interpolate_url_encodes_input_and_vars() {
        let mut vars = serde_json::Map::new();
        vars.insert("name".into(), json!("a b"));
        let rendered = interpolate("https://x/{{input}}?n={{var.name}}", "hi there", &vars);
        assert_eq!(rendered, "https://x/hi%20there?n=a%20b");
    }

    #[test]
    fn interpolate_plain_does_not_encode() {
        let rendered = interpolate_plain("{{input}}", "hi there", &Default::default());
        assert_eq!(rendered, "hi there");
    }

    #[test]
    fn render_body_does_not_url_encode_input() {
        let executor = HttpExecutor::new("h1", "https://x", Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            fail_times: 0,
            status: 200,
        }))
        .with_body_template(json!({"q": "{{input}}"}));
        let body = executor.render_body("hi there", &Default::default());
        assert_eq!(body, Some(json!({"q": "hi there"})));
    }

    #[test]
    fn interpolate_missing_var_is_empty() {
        let rendered = interpolate("{{var.missing}}", "", &Default::default());
        assert_eq!(rendered, "");
    }

    #[test]
    fn extract_path_walks_dots_and_indices() {
        let value = json!({"data": {"items": [{"id": 7}, {"id": 9}]}});
        assert_eq!(extract_path(&value, "data.items[1].id"), json!(9));
        assert_eq!(extract_path(&value, "data.items[9].id"), Value::Null);
    }

    struct FlakyTransport {
        calls: AtomicU32,
        fail_times: u32,
        status: u16,
    }

    #[async_trait]
    impl HttpTransport for FlakyTransport {
        async fn send(&self, _req: HttpRequestSpec, _ctx: &ExecutionContext) -> Result<HttpResponseSpec, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_times {
                Ok(HttpResponseSpec { status: self.status, body: json!({"attempt": n}) })
            } else {
                Ok(HttpResponseSpec { status: 200, body: json!({"attempt": n}) })
            }
        }
    }

    fn ctx() -> ExecutionContext {
        let bus = crate::event::EventBus::new();
        let emitter = bus.create_scope("e1");
        ExecutionContext::root("e1", crate::context::CancellationToken::new(), emitter)
    }

    #[tokio::test]
    async fn retries_on_503_until_success() {
        let transport = Arc::new(FlakyTransport { calls: AtomicU32::new(0), fail_times: 2, status: 503 });
        let executor = HttpExecutor::new("h1", "https://x/{{input}}", transport.clone())
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));
        let result = executor.execute(json!("q"), &ctx()).await.unwrap();
        assert_eq!(result.status, crate::model::ExecutionStatus::Success);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_retries_yields_failed_recoverable() {
        let transport = Arc::new(FlakyTransport { calls: AtomicU32::new(0), fail_times: 10, status: 503 });
        let executor = HttpExecutor::new("h1", "https://x", transport.clone())
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));
        let result = executor.execute(json!("q"), &ctx()).await.unwrap();
        assert_eq!(result.status, crate::model::ExecutionStatus::Failed);
        assert!(result.is_recoverable());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        let transport = Arc::new(FlakyTransport { calls: AtomicU32::new(0), fail_times: 10, status: 404 });
        let executor = HttpExecutor::new("h1", "https://x", transport.clone())
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
        let result = executor.execute(json!("q"), &ctx()).await.unwrap();
        assert_eq!(result.status, crate::model::ExecutionStatus::Failed);
        assert!(!result.is_recoverable());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
