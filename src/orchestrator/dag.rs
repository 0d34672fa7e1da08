//! The DAG orchestrator: topological readiness, bounded concurrency, and
//! cascading skip on failure. The most intricate composition
//! discipline — everything else in this crate schedules children against
//! a known order; this one derives the order from `edges` at construction
//! time and schedules against dependency counts at run time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::executor::{Executor, Factory};
use crate::model::{ExecutionError, ExecutionMetadata, ExecutionResult, ExecutionStatus, ExecutorConfig};
use crate::orchestrator::{execution_error_result, resolve_children, run_child, ChildEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

pub struct DagOrchestrator {
    id: String,
    max_concurrency: usize,
    entries: Vec<ChildEntry>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

/// The well-known variable slot a DAG node's output (or, for roots, the
/// orchestrator's input) is written to, following the "symmetric
/// handling" of roots. Namespaced so it cannot collide with a workflow's
/// own variable names.
fn slot_key(node_id: &str) -> String {
    format!("dag.{node_id}")
}

impl DagOrchestrator {
    pub(crate) fn new(config: &ExecutorConfig, factory: &Factory) -> crate::Result<Self> {
        let orch = config.orchestrator.as_ref().ok_or_else(|| {
            crate::KernelError::Validation(format!("dag composite '{}' has no orchestrator fields", config.id))
        })?;
        let (edges, max_concurrency) = match &orch.mode_config {
            crate::model::ModeConfig::Dag { edges, max_concurrency } => (edges.clone(), max_concurrency.unwrap_or(5)),
            _ => (Vec::new(), 5),
        };
        let (entries, index) = resolve_children(&orch.children, factory)?;
        let n = entries.len();
        let mut dependencies = vec![Vec::new(); n];
        let mut dependents = vec![Vec::new(); n];
        for edge in &edges {
            match (index.get(&edge.from), index.get(&edge.to)) {
                (Some(&from), Some(&to)) => {
                    dependents[from].push(to);
                    dependencies[to].push(from);
                }
                _ => {
                    tracing::warn!(from = %edge.from, to = %edge.to, "dropping DAG edge with unknown endpoint");
                }
            }
        }
        Ok(Self {
            id: config.id.clone(),
            max_concurrency: max_concurrency.max(1),
            entries,
            dependencies,
            dependents,
        })
    }

    /// Three-color DFS cycle check over the dependents adjacency.
    fn has_cycle(&self) -> bool {
        let n = self.entries.len();
        let mut color = vec![0u8; n];
        for start in 0..n {
            if color[start] == 0 && Self::visit(start, &self.dependents, &mut color) {
                return true;
            }
        }
        false
    }

    fn visit(u: usize, adj: &[Vec<usize>], color: &mut [u8]) -> bool {
        color[u] = 1;
        for &v in &adj[u] {
            if color[v] == 1 {
                return true;
            }
            if color[v] == 0 && Self::visit(v, adj, color) {
                return true;
            }
        }
        color[u] = 2;
        false
    }

    fn compute_input(&self, idx: usize, original_input: &Value, results: &[Option<ExecutionResult>]) -> Value {
        let deps = &self.dependencies[idx];
        if deps.is_empty() {
            original_input.clone()
        } else if deps.len() == 1 {
            results[deps[0]].as_ref().map(|r| r.output.clone()).unwrap_or(Value::Null)
        } else {
            let mut map = serde_json::Map::new();
            for &d in deps {
                let output = results[d].as_ref().map(|r| r.output.clone()).unwrap_or(Value::Null);
                map.insert(self.entries[d].id.clone(), output);
            }
            Value::Object(map)
        }
    }
}

#[async_trait]
impl Executor for DagOrchestrator {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        let n = self.entries.len();
        if n == 0 {
            return Ok(ExecutionResult::success(Value::Array(vec![])));
        }

        if self.has_cycle() {
            tracing::error!(dag_id = %self.id, "DAG contains a cycle, refusing to execute any node");
            return Ok(ExecutionResult::failed(
                Value::Null,
                vec![ExecutionError::new("INVALID_DAG", "DAG contains a cycle", false)],
            ));
        }

        let mut state = vec![NodeState::Pending; n];
        let mut results: Vec<Option<ExecutionResult>> = vec![None; n];
        for i in 0..n {
            if self.dependencies[i].is_empty() {
                state[i] = NodeState::Ready;
            }
        }

        let mut in_flight = FuturesUnordered::new();
        let mut running: HashSet<usize> = HashSet::new();

        loop {
            context.check_cancelled()?;

            let capacity = self.max_concurrency.saturating_sub(running.len());
            let mut started = 0usize;
            for i in 0..n {
                if started >= capacity {
                    break;
                }
                if state[i] == NodeState::Ready {
                    state[i] = NodeState::Running;
                    running.insert(i);
                    started += 1;

                    let dag_input = self.compute_input(i, &input, &results);
                    if self.dependencies[i].is_empty() {
                        context.variables().set(slot_key(&self.entries[i].id), dag_input.clone());
                    }
                    let child = self.entries[i].clone();
                    let ctx = context.clone();
                    in_flight.push(async move {
                        let outcome = run_child(&ctx, &child, dag_input, Some("dag")).await;
                        (i, outcome)
                    });
                }
            }

            if in_flight.is_empty() {
                break;
            }

            if let Some((idx, outcome)) = in_flight.next().await {
                running.remove(&idx);
                let result = match outcome {
                    Ok(r) => r,
                    Err(crate::KernelError::Cancelled) => return Err(crate::KernelError::Cancelled),
                    Err(err) => execution_error_result(err.to_string()),
                };
                let succeeded = result.status != ExecutionStatus::Failed;
                context.variables().set(slot_key(&self.entries[idx].id), result.output.clone());
                results[idx] = Some(result);
                state[idx] = if succeeded { NodeState::Completed } else { NodeState::Failed };

                if succeeded {
                    for &dep in &self.dependents[idx] {
                        if state[dep] == NodeState::Pending
                            && self.dependencies[dep].iter().all(|&d| state[d] == NodeState::Completed)
                        {
                            state[dep] = NodeState::Ready;
                        }
                    }
                } else {
                    let mut stack: Vec<usize> = self.dependents[idx].clone();
                    while let Some(d) = stack.pop() {
                        if state[d] == NodeState::Pending {
                            state[d] = NodeState::Skipped;
                            stack.extend(self.dependents[d].iter().copied());
                        }
                    }
                }
            }
        }

        let sinks: Vec<usize> = (0..n).filter(|&i| self.dependents[i].is_empty()).collect();
        let outputs: Vec<Value> = sinks
            .iter()
            .map(|&i| results[i].as_ref().map(|r| r.output.clone()).unwrap_or(Value::Null))
            .collect();
        let output = if outputs.len() == 1 { outputs[0].clone() } else { Value::Array(outputs) };

        let completed = state.iter().filter(|s| **s == NodeState::Completed).count();
        let failed = state.iter().filter(|s| **s == NodeState::Failed).count();
        let skipped = state.iter().filter(|s| **s == NodeState::Skipped).count();
        let status = if failed > 0 { ExecutionStatus::Partial } else { ExecutionStatus::Success };
        let errors: Vec<ExecutionError> =
            results.iter().flatten().filter(|r| r.status == ExecutionStatus::Failed).flat_map(|r| r.errors.clone()).collect();

        Ok(ExecutionResult {
            status,
            output,
            control: crate::model::ControlDirective::cont(),
            metadata: Some(ExecutionMetadata {
                executor_id: Some(self.id.clone()),
                executor_type: Some("composite".to_string()),
                extra: HashMap::from([
                    ("completed".to_string(), json!(completed)),
                    ("failed".to_string(), json!(failed)),
                    ("skipped".to_string(), json!(skipped)),
                ]),
                ..Default::default()
            }),
            errors,
        })
    }

    fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) fn create(config: &ExecutorConfig, factory: Factory) -> crate::Result<Arc<dyn Executor>> {
    Ok(Arc::new(DagOrchestrator::new(config, &factory)?))
}
