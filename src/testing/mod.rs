//! Scripted atomic executors for tests, grounded on
//! `orchestrator::src::testing`/`pregel::executor`'s `FailingExecutor`
//! pattern: a handful of in-memory mocks a workflow can be built from
//! without standing up a real model/HTTP/tool transport.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::executor::{Executor, Factory};
use crate::model::{ExecutionError, ExecutionResult};

/// Echoes its input back unchanged, optionally appending a fixed suffix.
/// The simplest possible atomic leaf — stands in for `agent`/`http`/`tool`
/// in tests that only care about composition, not transport behavior.
pub struct EchoExecutor {
    id: String,
    suffix: String,
}

impl EchoExecutor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), suffix: String::new() }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        context.check_cancelled()?;
        if self.suffix.is_empty() {
            return Ok(ExecutionResult::success(input));
        }
        let text = match input {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(ExecutionResult::success(Value::String(format!("{text}{}", self.suffix))))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Always returns a failed result with a fixed error code/message,
/// optionally marked recoverable so callers can exercise retry paths.
pub struct FailingExecutor {
    id: String,
    code: String,
    message: String,
    recoverable: bool,
}

impl FailingExecutor {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { id: id.into(), code: "EXECUTION_ERROR".to_string(), message: message.into(), recoverable: false }
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }
}

#[async_trait]
impl Executor for FailingExecutor {
    async fn execute(&self, _input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        context.check_cancelled()?;
        Ok(ExecutionResult::failed(
            Value::Null,
            vec![ExecutionError::new(self.code.clone(), self.message.clone(), self.recoverable)],
        ))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Fails a fixed number of times before succeeding, echoing its input on
/// the eventual success. Used to exercise retry/backoff paths (serial
/// composite retry, `http` executor retry) without a real flaky transport.
pub struct FlakyExecutor {
    id: String,
    fail_times: u32,
    calls: AtomicU32,
    recoverable: bool,
}

impl FlakyExecutor {
    pub fn new(id: impl Into<String>, fail_times: u32) -> Self {
        Self { id: id.into(), fail_times, calls: AtomicU32::new(0), recoverable: true }
    }
}

#[async_trait]
impl Executor for FlakyExecutor {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        context.check_cancelled()?;
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_times {
            return Ok(ExecutionResult::failed(
                Value::Null,
                vec![ExecutionError::new("DRIVER_ERROR", format!("attempt {attempt} failed"), self.recoverable)],
            )
            .with_control(crate::model::ControlDirective::cont()));
        }
        Ok(ExecutionResult::success(input))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Sleeps for a fixed duration, checking cancellation in small increments,
/// then echoes its input. Used to exercise timeout and cancellation paths.
pub struct DelayExecutor {
    id: String,
    delay: Duration,
}

impl DelayExecutor {
    pub fn new(id: impl Into<String>, delay: Duration) -> Self {
        Self { id: id.into(), delay }
    }
}

#[async_trait]
impl Executor for DelayExecutor {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        let step = Duration::from_millis(5);
        let mut remaining = self.delay;
        while remaining > Duration::ZERO {
            context.check_cancelled()?;
            let chunk = remaining.min(step);
            tokio::time::sleep(chunk).await;
            remaining = remaining.saturating_sub(chunk);
        }
        context.check_cancelled()?;
        Ok(ExecutionResult::success(input))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Register the `echo`/`failing`/`delay` custom types on `factory`, so
/// integration tests can reference them by config `type` the same way a
/// real caller references `agent`/`http`/`tool`.
pub fn register_mocks(factory: &Factory) {
    factory.register_atomic(
        "echo",
        Arc::new(|config: &crate::model::ExecutorConfig| {
            let suffix = config.extra.get("suffix").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            Ok(Arc::new(EchoExecutor::new(config.id.clone()).with_suffix(suffix)) as Arc<dyn Executor>)
        }),
    );
    factory.register_atomic(
        "failing",
        Arc::new(|config: &crate::model::ExecutorConfig| {
            let message = config.extra.get("message").and_then(|v| v.as_str()).unwrap_or("mock failure").to_string();
            let recoverable = config.extra.get("recoverable").and_then(|v| v.as_bool()).unwrap_or(false);
            let mut executor = FailingExecutor::new(config.id.clone(), message);
            if recoverable {
                executor = executor.recoverable();
            }
            Ok(Arc::new(executor) as Arc<dyn Executor>)
        }),
    );
    factory.register_atomic(
        "delay",
        Arc::new(|config: &crate::model::ExecutorConfig| {
            let millis = config.extra.get("delayMs").and_then(|v| v.as_u64()).unwrap_or(10);
            Ok(Arc::new(DelayExecutor::new(config.id.clone(), Duration::from_millis(millis))) as Arc<dyn Executor>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use crate::event::EventBus;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let bus = EventBus::new();
        let emitter = bus.create_scope("e1");
        ExecutionContext::root("e1", CancellationToken::new(), emitter)
    }

    #[tokio::test]
    async fn echo_with_suffix_appends() {
        let echo = EchoExecutor::new("e").with_suffix("!");
        let result = echo.execute(json!("hi"), &ctx()).await.unwrap();
        assert_eq!(result.output, json!("hi!"));
    }

    #[tokio::test]
    async fn failing_marks_recoverable_when_requested() {
        let fail = FailingExecutor::new("f", "boom").recoverable();
        let result = fail.execute(json!("x"), &ctx()).await.unwrap();
        assert!(result.is_recoverable());
    }

    #[tokio::test]
    async fn flaky_succeeds_after_configured_failures() {
        let flaky = FlakyExecutor::new("fl", 2);
        let first = flaky.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(first.status, crate::model::ExecutionStatus::Failed);
        let second = flaky.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(second.status, crate::model::ExecutionStatus::Failed);
        let third = flaky.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(third.status, crate::model::ExecutionStatus::Success);
        assert_eq!(third.output, json!("x"));
    }

    #[tokio::test]
    async fn register_mocks_wires_the_named_types() {
        let factory = Factory::with_default_orchestrators();
        register_mocks(&factory);
        assert!(factory.supports("echo"));
        assert!(factory.supports("failing"));
        assert!(factory.supports("delay"));
    }
}
