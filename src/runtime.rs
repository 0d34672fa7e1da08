//! The top-level entry point: wires cancellation, builds the
//! root [`ExecutionContext`] and event scope, resolves and runs the root
//! executor through the [`Factory`], and guarantees cleanup on every path.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::{CancellationToken, ExecutionContext};
use crate::event::{Event, EventBus, EventType, SubscribeOptions, SubscriptionId};
use crate::executor::Factory;
use crate::model::{ExecutionError, ExecutionResult, ExecutorConfig};
use crate::orchestrator::status_str;

/// Per-call options accepted by [`Runtime::execute`].
#[derive(Default)]
pub struct RuntimeOptions {
    /// Overrides the derived execution id outright.
    pub execution_id: Option<String>,
    /// Cancels the run cooperatively once elapsed.
    pub timeout: Option<Duration>,
    /// An external cancellation signal linked into this run's internal
    /// token; cancelling either cancels both.
    pub external_cancellation: Option<CancellationToken>,
    /// Seeded into the root context's variable frame before execution
    /// starts.
    pub variables: serde_json::Map<String, Value>,
}

/// The kernel's top-level entry point. Cheap to clone — clones share the
/// same event bus, factory, and active-executions table.
#[derive(Clone)]
pub struct Runtime {
    bus: EventBus,
    factory: Factory,
    active: Arc<DashMap<String, CancellationToken>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A runtime with the default factory (the five built-in
    /// orchestrator modes plus the self-contained `script` atomic type).
    /// Call [`Runtime::with_factory`] to supply one with `agent`/`http`/
    /// `tool` creators wired to real transports.
    pub fn new() -> Self {
        Self::with_factory(Factory::with_default_orchestrators())
    }

    pub fn with_factory(factory: Factory) -> Self {
        Self { bus: EventBus::new(), factory, active: Arc::new(DashMap::new()) }
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run `config` against `input` to completion. Always returns a
    /// result — the only way a caller sees an `Err` is a validation
    /// failure discovered before the run was ever registered.
    pub async fn execute(
        &self,
        config: &ExecutorConfig,
        input: Value,
        options: RuntimeOptions,
    ) -> crate::Result<ExecutionResult> {
        config.validate()?;

        let execution_id = options
            .execution_id
            .clone()
            .or_else(|| options.variables.get("sessionId").and_then(|v| v.as_str()).map(|s| s.to_string()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let cancellation = CancellationToken::new();
        if let Some(external) = &options.external_cancellation {
            cancellation.link(external);
        }
        let _timeout_guard = options.timeout.map(|duration| cancellation.arm_timeout(duration));

        self.active.insert(execution_id.clone(), cancellation.clone());

        let scope = self.bus.create_scope(execution_id.clone());
        let context = ExecutionContext::root(execution_id.clone(), cancellation.clone(), scope.clone());
        for (key, value) in options.variables.iter() {
            context.variables().set(key.clone(), value.clone());
        }

        scope.emit(
            EventType::ExecutionStart,
            json!({
                "executionId": execution_id,
                "config": { "id": config.id, "name": config.name, "type": config.kind.as_str() },
            }),
            None,
        );
        tracing::info!(execution_id = %execution_id, executor = %config.id, "execution started");

        let outcome = self.run_root(config, input, &context).await;

        let result = match outcome {
            Ok(result) => {
                scope.emit(
                    EventType::ExecutionComplete,
                    json!({ "executionId": execution_id, "status": status_str(result.status), "output": result.output }),
                    None,
                );
                tracing::info!(execution_id = %execution_id, status = status_str(result.status), "execution complete");
                result
            }
            Err(crate::KernelError::Cancelled) => {
                scope.emit(EventType::ExecutionCancel, json!({ "executionId": execution_id }), None);
                tracing::info!(execution_id = %execution_id, "execution cancelled");
                ExecutionResult::cancelled()
            }
            Err(err) => {
                scope.emit(
                    EventType::ExecutionError,
                    json!({ "executionId": execution_id, "error": err.to_string() }),
                    None,
                );
                tracing::error!(execution_id = %execution_id, error = %err, "execution error");
                ExecutionResult::failed(Value::Null, vec![ExecutionError::new("EXECUTION_ERROR", err.to_string(), false)])
            }
        };

        self.active.remove(&execution_id);
        scope.deactivate();

        Ok(result)
    }

    async fn run_root(
        &self,
        config: &ExecutorConfig,
        input: Value,
        context: &ExecutionContext,
    ) -> crate::Result<ExecutionResult> {
        let root = self.factory.create(config)?;
        root.execute(input, context).await
    }

    /// Flip the cancellation token for one in-flight execution. A no-op
    /// if no such execution is registered (already finished, or never
    /// started).
    pub fn cancel(&self, execution_id: &str) {
        if let Some(token) = self.active.get(execution_id) {
            token.cancel();
        }
    }

    /// Flip every in-flight execution's cancellation token.
    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }

    /// Subscribe to one event type (or the wildcard) across every
    /// execution this runtime hosts.
    pub fn on_event(
        &self,
        event_type: Option<EventType>,
        handler: Arc<dyn Fn(&Event) -> crate::Result<()> + Send + Sync>,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        self.bus.subscribe(event_type, handler, options)
    }

    /// Subscribe to one event type (or the wildcard) scoped to a single
    /// execution id, regardless of whether that execution has started.
    pub fn on_execution_event(
        &self,
        execution_id: impl Into<String>,
        event_type: Option<EventType>,
        handler: Arc<dyn Fn(&Event) -> crate::Result<()> + Send + Sync>,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let execution_id = execution_id.into();
        let user_filter = options.filter.clone();
        let filter: Arc<dyn Fn(&Event) -> bool + Send + Sync> = Arc::new(move |event: &Event| {
            event.execution_id == execution_id && user_filter.as_ref().map(|f| f(event)).unwrap_or(true)
        });
        self.bus.subscribe(event_type, handler, options.with_filter(filter))
    }
}
