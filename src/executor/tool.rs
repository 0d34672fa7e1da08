//! The `tool` atomic executor: a typed function call with argument schema
//! and timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::executor::Executor;
use crate::model::{ExecutionError, ExecutionMetadata, ExecutionResult};

/// A minimal JSON-schema-like parameter description: just enough to
/// validate presence and primitive type of the arguments a tool expects.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
            ParamKind::Any => true,
        }
    }
}

/// Validate `args` against `params`. Returns the first violation found.
pub fn validate_args(params: &[ParamSpec], args: &Value) -> Result<(), String> {
    let obj = args.as_object().ok_or_else(|| "arguments must be a JSON object".to_string())?;
    for param in params {
        match obj.get(&param.name) {
            Some(value) if !param.kind.matches(value) => {
                return Err(format!("argument '{}' has the wrong type", param.name));
            }
            None if param.required => {
                return Err(format!("missing required argument '{}'", param.name));
            }
            _ => {}
        }
    }
    Ok(())
}

/// The handler a `tool` executor invokes after validating arguments.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, context: &ExecutionContext) -> crate::Result<Value>;
}

/// Wraps a plain async closure as a [`ToolHandler`], for tests and simple
/// in-process tools.
pub struct FnToolHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = crate::Result<Value>> + Send,
{
    async fn call(&self, args: Value, _context: &ExecutionContext) -> crate::Result<Value> {
        (self.0)(args).await
    }
}

pub struct ToolExecutor {
    id: String,
    name: String,
    params: Vec<ParamSpec>,
    timeout: Duration,
    handler: std::sync::Arc<dyn ToolHandler>,
}

impl ToolExecutor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, handler: std::sync::Arc<dyn ToolHandler>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params: Vec::new(),
            timeout: Duration::from_secs(30),
            handler,
        }
    }

    pub fn with_params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Executor for ToolExecutor {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        context.check_cancelled()?;
        let start = chrono::Utc::now();

        if let Err(message) = validate_args(&self.params, &input) {
            return Ok(ExecutionResult::failed(Value::Null, vec![ExecutionError::new("VALIDATION_ERROR", message, false)]));
        }

        context.emitter().emit(
            crate::event::EventType::StreamToolCall,
            serde_json::json!({ "toolName": self.name, "status": "running", "args": input }),
            context.node_id().map(|s| s.to_string()),
        );

        let outcome = tokio::time::timeout(self.timeout, self.handler.call(input.clone(), context)).await;

        let result = match outcome {
            Ok(Ok(value)) => {
                context.emitter().emit(
                    crate::event::EventType::StreamToolCall,
                    serde_json::json!({ "toolName": self.name, "status": "success", "result": value }),
                    context.node_id().map(|s| s.to_string()),
                );
                ExecutionResult::success(value)
            }
            Ok(Err(crate::KernelError::Cancelled)) => return Err(crate::KernelError::Cancelled),
            Ok(Err(err)) => {
                context.emitter().emit(
                    crate::event::EventType::StreamToolCall,
                    serde_json::json!({ "toolName": self.name, "status": "failed", "error": err.to_string() }),
                    context.node_id().map(|s| s.to_string()),
                );
                ExecutionResult::failed(Value::Null, vec![ExecutionError::new("EXECUTION_ERROR", err.to_string(), false)])
            }
            Err(_elapsed) => {
                let message = format!("tool '{}' timed out after {:?}", self.name, self.timeout);
                context.emitter().emit(
                    crate::event::EventType::StreamToolCall,
                    serde_json::json!({ "toolName": self.name, "status": "failed", "error": message }),
                    context.node_id().map(|s| s.to_string()),
                );
                ExecutionResult::failed(Value::Null, vec![ExecutionError::new("TIMEOUT", message, true)])
            }
        };

        let end = chrono::Utc::now();
        Ok(result.with_metadata(ExecutionMetadata {
            executor_id: Some(self.id.clone()),
            executor_type: Some("tool".to_string()),
            start_time: Some(start),
            end_time: Some(end),
            duration_ms: Some((end - start).num_milliseconds().max(0) as u64),
            retry_count: 0,
            extra: HashMap::new(),
        }))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let bus = crate::event::EventBus::new();
        let emitter = bus.create_scope("e1");
        ExecutionContext::root("e1", crate::context::CancellationToken::new(), emitter)
    }

    #[tokio::test]
    async fn validates_required_argument() {
        let handler = std::sync::Arc::new(FnToolHandler(|args: Value| async move { Ok(args) }));
        let tool = ToolExecutor::new("t1", "echo", handler).with_params(vec![ParamSpec {
            name: "text".into(),
            required: true,
            kind: ParamKind::String,
        }]);
        let result = tool.execute(json!({}), &ctx()).await.unwrap();
        assert_eq!(result.status, crate::model::ExecutionStatus::Failed);
        assert_eq!(result.errors[0].code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn runs_handler_and_returns_output() {
        let handler = std::sync::Arc::new(FnToolHandler(|args: Value| async move { Ok(json!({"got": args})) }));
        let tool = ToolExecutor::new("t1", "echo", handler);
        let result = tool.execute(json!({"x": 1}), &ctx()).await.unwrap();
        assert_eq!(result.status, crate::model::ExecutionStatus::Success);
        assert_eq!(result.output, json!({"got": {"x": 1}}));
    }

    #[tokio::test]
    async fn timeout_produces_recoverable_failure() {
        let handler = std::sync::Arc::new(FnToolHandler(|_args: Value| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Value::Null)
        }));
        let tool = ToolExecutor::new("t1", "slow", handler).with_timeout(Duration::from_millis(5));
        let result = tool.execute(json!({}), &ctx()).await.unwrap();
        assert_eq!(result.status, crate::model::ExecutionStatus::Failed);
        assert!(result.is_recoverable());
        assert_eq!(result.errors[0].code, "TIMEOUT");
    }
}
