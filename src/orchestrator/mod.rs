//! The five composition disciplines a `composite` config can name (spec
//! the composite modes: [`serial`], [`parallel`], [`router`], [`loop_orchestrator`],
//! and [`dag`]. Each module exposes a `create(config, factory)` function
//! matching [`crate::executor::factory::OrchestratorCreator`], registered
//! by [`crate::executor::Factory::with_default_orchestrators`].
//!
//! This module also holds the bookkeeping every orchestrator shares:
//! resolving children into an id-addressable, order-preserving list, and
//! dispatching one child with the `node:start`/`node:complete`/`node:error`
//! bracketing every node that
//! begins.

pub mod dag;
pub mod loop_orchestrator;
pub mod parallel;
pub mod router;
pub mod serial;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::ExecutionContext;
use crate::event::EventType;
use crate::executor::{Executor, Factory};
use crate::model::{ExecutionResult, ExecutionStatus, ExecutorConfig};

/// One resolved child: its static config fields (id/name/type) alongside
/// the instantiated executor the factory produced for it.
#[derive(Clone)]
pub(crate) struct ChildEntry {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub executor: Arc<dyn Executor>,
}

/// Resolve a composite's children through the factory, in config order,
/// plus an id -> position index for keyed lookups (router targets, DAG
/// edges, loop `route` jumps).
pub(crate) fn resolve_children(
    children: &[ExecutorConfig],
    factory: &Factory,
) -> crate::Result<(Vec<ChildEntry>, HashMap<String, usize>)> {
    let mut entries = Vec::with_capacity(children.len());
    let mut index = HashMap::with_capacity(children.len());
    for child in children {
        let executor = factory.create(child)?;
        index.insert(child.id.clone(), entries.len());
        entries.push(ChildEntry {
            id: child.id.clone(),
            name: child.name.clone(),
            kind: child.kind.as_str().to_string(),
            executor,
        });
    }
    Ok((entries, index))
}

/// Render an input value the way router/loop expression environments and
/// `node:start` payloads want it: strings pass through, everything else
/// is JSON-stringified.
pub(crate) fn stringify_input(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run one child under the standard node lifecycle bracketing: a
/// cancellation check, `node:start`, the child's own `execute`, and
/// exactly one of `node:complete`/`node:error`. Shared by every
/// orchestrator so the bracketing is identical regardless of composition
/// discipline.
pub(crate) async fn run_child(
    context: &ExecutionContext,
    child: &ChildEntry,
    input: Value,
    mode: Option<&str>,
) -> crate::Result<ExecutionResult> {
    context.check_cancelled()?;
    let child_context = context.create_child(child.id.clone());

    let mut start_payload = serde_json::json!({
        "executorId": child.id,
        "executorType": child.kind,
        "name": child.name,
        "input": input,
    });
    if let Some(mode) = mode {
        start_payload["mode"] = Value::String(mode.to_string());
    }
    context.emitter().emit(EventType::NodeStart, start_payload, Some(child.id.clone()));
    tracing::debug!(child_id = %child.id, "dispatching child");

    let outcome = child.executor.execute(input, &child_context).await;

    match outcome {
        Ok(result) => {
            if result.status == ExecutionStatus::Failed {
                let message = result
                    .errors
                    .first()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "child failed".to_string());
                context.emitter().emit(
                    EventType::NodeError,
                    serde_json::json!({ "executorId": child.id, "error": message }),
                    Some(child.id.clone()),
                );
            } else {
                context.emitter().emit(
                    EventType::NodeComplete,
                    serde_json::json!({ "executorId": child.id, "status": status_str(result.status), "output": result.output }),
                    Some(child.id.clone()),
                );
            }
            Ok(result)
        }
        Err(crate::KernelError::Cancelled) => Err(crate::KernelError::Cancelled),
        Err(err) => {
            context.emitter().emit(
                EventType::NodeError,
                serde_json::json!({ "executorId": child.id, "error": err.to_string() }),
                Some(child.id.clone()),
            );
            Err(err)
        }
    }
}

pub(crate) fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Success => "success",
        ExecutionStatus::Partial => "partial",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

/// Synthesize the `{status: failed, output: null, control: end, errors:
/// [EXECUTION_ERROR]}` shape used when a child's `execute`
/// throws instead of returning a result.
pub(crate) fn execution_error_result(message: impl Into<String>) -> ExecutionResult {
    ExecutionResult::failed(
        Value::Null,
        vec![crate::model::ExecutionError::new("EXECUTION_ERROR", message, false)],
    )
}
