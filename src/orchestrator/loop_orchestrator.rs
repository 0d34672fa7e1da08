//! Runs its children serially as one "iteration", repeating up to
//! `maxIterations` with three iteration variables written into scope each
//! time, until a child signals `end`, an `exitCondition` goes truthy, or
//! the cap is hit.
//!
//! Module name avoids the `loop` keyword; the config's `mode` string is
//! still the literal `"loop"`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::executor::{Executor, Factory};
use crate::model::{ControlAction, ExecutionError, ExecutionMetadata, ExecutionResult, ExecutionStatus, ExecutorConfig};
use crate::orchestrator::{resolve_children, run_child, ChildEntry};

pub struct LoopOrchestrator {
    id: String,
    max_iterations: u32,
    exit_condition: Option<String>,
    iteration_delay_ms: Option<u64>,
    collect_results: bool,
    children: Vec<ChildEntry>,
    index: HashMap<String, usize>,
}

impl LoopOrchestrator {
    pub(crate) fn new(config: &ExecutorConfig, factory: &Factory) -> crate::Result<Self> {
        let orch = config.orchestrator.as_ref().ok_or_else(|| {
            crate::KernelError::Validation(format!("loop composite '{}' has no orchestrator fields", config.id))
        })?;
        let (max_iterations, exit_condition, iteration_delay_ms, collect_results) = match &orch.mode_config {
            crate::model::ModeConfig::Loop { max_iterations, exit_condition, iteration_delay_ms, collect_results } => {
                (*max_iterations, exit_condition.clone(), *iteration_delay_ms, *collect_results)
            }
            _ => (0, None, None, false),
        };
        let (children, index) = resolve_children(&orch.children, factory)?;
        Ok(Self {
            id: config.id.clone(),
            max_iterations,
            exit_condition,
            iteration_delay_ms,
            collect_results,
            children,
            index,
        })
    }

    /// Run every child once, serially, piping outputs across them. Returns
    /// the final result of the iteration and whether a child requested an
    /// immediate stop (`control.action == end`).
    async fn run_iteration(&self, context: &ExecutionContext, input: Value) -> crate::Result<(ExecutionResult, bool)> {
        let mut current_input = input;
        let mut idx = 0usize;
        let mut last_result: Option<ExecutionResult> = None;

        loop {
            context.check_cancelled()?;
            let Some(child) = self.children.get(idx) else {
                break;
            };
            let result = run_child(context, child, current_input.clone(), Some("loop")).await?;
            let control = result.control.clone();
            current_input = result.output.clone();
            last_result = Some(result);

            match control.action {
                ControlAction::End | ControlAction::Cancel | ControlAction::Pause => {
                    return Ok((last_result.expect("just set"), true));
                }
                ControlAction::Route => {
                    idx = control.target.as_ref().and_then(|t| self.index.get(t).copied()).unwrap_or(idx + 1);
                }
                ControlAction::Continue | ControlAction::Retry => idx += 1,
            }
        }

        Ok((last_result.unwrap_or_else(|| ExecutionResult::success(current_input)), false))
    }
}

#[async_trait]
impl Executor for LoopOrchestrator {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        if self.max_iterations == 0 {
            return Ok(ExecutionResult::success(input).with_metadata(ExecutionMetadata {
                executor_id: Some(self.id.clone()),
                executor_type: Some("composite".to_string()),
                extra: HashMap::from([("totalIterations".to_string(), json!(0))]),
                ..Default::default()
            }));
        }

        let mut current_input = input;
        let mut last_output = current_input.clone();
        let mut collected = Vec::new();
        let mut any_failed = false;
        let mut completed: u32 = 0;

        for i in 0..self.max_iterations {
            context.check_cancelled()?;
            context.variables().set("_iteration", json!(i));
            context.variables().set("_isFirstIteration", json!(i == 0));
            context.variables().set("_isLastIteration", json!(i == self.max_iterations - 1));

            let (iter_result, ended_by_child) = match self.run_iteration(context, current_input.clone()).await {
                Ok(v) => v,
                Err(crate::KernelError::Cancelled) => return Err(crate::KernelError::Cancelled),
                Err(err) => {
                    tracing::error!(iteration = i, error = %err, "loop aborted by child error");
                    return Ok(ExecutionResult::failed(
                        last_output,
                        vec![ExecutionError::new("LOOP_ERROR", err.to_string(), false)],
                    ));
                }
            };

            if iter_result.status == ExecutionStatus::Failed {
                any_failed = true;
            }
            last_output = iter_result.output.clone();
            current_input = last_output.clone();
            completed = i + 1;
            if self.collect_results {
                collected.push(last_output.clone());
            }

            if ended_by_child {
                break;
            }

            let mut env = context.variables().to_object();
            env.insert("output".to_string(), last_output.clone());
            env.insert("iteration".to_string(), json!(i));
            let exit_now = self
                .exit_condition
                .as_ref()
                .map(|expr| crate::expr::evaluate(expr, &env))
                .unwrap_or(false);
            if exit_now {
                break;
            }

            if i + 1 < self.max_iterations {
                if let Some(delay) = self.iteration_delay_ms {
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        let output = if self.collect_results { Value::Array(collected) } else { last_output };
        let status = if any_failed { ExecutionStatus::Partial } else { ExecutionStatus::Success };

        Ok(ExecutionResult {
            status,
            output,
            control: crate::model::ControlDirective::cont(),
            metadata: Some(ExecutionMetadata {
                executor_id: Some(self.id.clone()),
                executor_type: Some("composite".to_string()),
                extra: HashMap::from([("totalIterations".to_string(), json!(completed))]),
                ..Default::default()
            }),
            errors: Vec::new(),
        })
    }

    fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) fn create(config: &ExecutorConfig, factory: Factory) -> crate::Result<Arc<dyn Executor>> {
    Ok(Arc::new(LoopOrchestrator::new(config, &factory)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use crate::event::EventBus;
    use crate::model::{Constraints, ExecutorKind, ModeConfig, OrchestratorFields, OrchestratorMode};
    use std::collections::HashMap as Map;

    fn ctx() -> ExecutionContext {
        let bus = EventBus::new();
        let emitter = bus.create_scope("e1");
        ExecutionContext::root("e1", CancellationToken::new(), emitter)
    }

    fn dot_child() -> ExecutorConfig {
        let mut extra = Map::new();
        extra.insert("template".to_string(), json!("{{input}}."));
        ExecutorConfig {
            id: "dot".into(),
            name: "dot".into(),
            kind: ExecutorKind::script(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: None,
            extra,
        }
    }

    fn loop_config(max_iterations: u32, exit_condition: Option<&str>, collect_results: bool) -> ExecutorConfig {
        ExecutorConfig {
            id: "l".into(),
            name: "l".into(),
            kind: ExecutorKind::composite(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: Some(OrchestratorFields {
                mode: OrchestratorMode::Loop,
                children: vec![dot_child()],
                mode_config: ModeConfig::Loop {
                    max_iterations,
                    exit_condition: exit_condition.map(|s| s.to_string()),
                    iteration_delay_ms: None,
                    collect_results,
                },
            }),
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn zero_iterations_echoes_input() {
        let factory = Factory::with_default_orchestrators();
        let config = loop_config(0, None, true);
        let orch = LoopOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!(""), &ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, json!(""));
        assert_eq!(result.metadata.unwrap().extra["totalIterations"], json!(0));
    }

    #[tokio::test]
    async fn s4_exit_condition_stops_after_fourth_iteration() {
        let factory = Factory::with_default_orchestrators();
        let config = loop_config(10, Some("iteration >= 3"), false);
        let orch = LoopOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!(""), &ctx()).await.unwrap();
        assert_eq!(result.output, json!("...."));
        assert_eq!(result.metadata.unwrap().extra["totalIterations"], json!(4));
    }

    #[tokio::test]
    async fn collect_results_returns_per_iteration_outputs() {
        let factory = Factory::with_default_orchestrators();
        let config = loop_config(3, None, true);
        let orch = LoopOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!(""), &ctx()).await.unwrap();
        assert_eq!(result.output, json!([".", "..", "..."]));
    }
}
