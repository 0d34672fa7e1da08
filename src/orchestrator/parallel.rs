//! Fans the same input out to every child, bounded by `maxConcurrency`,
//! and merges their results per `mergeStrategy`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::executor::{Executor, Factory};
use crate::model::{ExecutionError, ExecutionMetadata, ExecutionResult, ExecutionStatus, ExecutorConfig, MergeStrategy};
use crate::orchestrator::{execution_error_result, resolve_children, run_child, ChildEntry};

pub struct ParallelOrchestrator {
    id: String,
    max_concurrency: usize,
    merge_strategy: MergeStrategy,
    children: Vec<ChildEntry>,
}

impl ParallelOrchestrator {
    pub(crate) fn new(config: &ExecutorConfig, factory: &Factory) -> crate::Result<Self> {
        let orch = config.orchestrator.as_ref().ok_or_else(|| {
            crate::KernelError::Validation(format!("parallel composite '{}' has no orchestrator fields", config.id))
        })?;
        let (max_concurrency, merge_strategy) = match &orch.mode_config {
            crate::model::ModeConfig::Parallel { max_concurrency, merge_strategy } => {
                (max_concurrency.unwrap_or(orch.children.len().max(1)), *merge_strategy)
            }
            _ => (orch.children.len().max(1), MergeStrategy::All),
        };
        let (children, _index) = resolve_children(&orch.children, factory)?;
        Ok(Self {
            id: config.id.clone(),
            max_concurrency: max_concurrency.max(1),
            merge_strategy,
            children,
        })
    }
}

#[async_trait]
impl Executor for ParallelOrchestrator {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        if self.children.is_empty() {
            return Ok(ExecutionResult::success(Value::Array(vec![])));
        }

        context.check_cancelled()?;

        // Bounded worker pool draining a queue of child indices:
        // never more than `max_concurrency` children in flight at
        // once, regardless of how the underlying futures are polled.
        let mut results: Vec<Option<ExecutionResult>> = vec![None; self.children.len()];
        let mut queue: std::collections::VecDeque<usize> = (0..self.children.len()).collect();
        let mut in_flight = FuturesUnordered::new();

        let spawn_next = |queue: &mut std::collections::VecDeque<usize>| queue.pop_front();

        while !queue.is_empty() || !in_flight.is_empty() {
            context.check_cancelled()?;

            while in_flight.len() < self.max_concurrency {
                let Some(idx) = spawn_next(&mut queue) else { break };
                let child = self.children[idx].clone();
                let input = input.clone();
                let ctx = context.clone();
                in_flight.push(async move {
                    let result = match run_child(&ctx, &child, input, Some("parallel")).await {
                        Ok(result) => result,
                        Err(crate::KernelError::Cancelled) => ExecutionResult::cancelled(),
                        Err(err) => execution_error_result(err.to_string()),
                    };
                    (idx, result)
                });
            }

            if let Some((idx, result)) = in_flight.next().await {
                results[idx] = Some(result);
            }
        }

        let results: Vec<ExecutionResult> = results.into_iter().map(|r| r.expect("every index scheduled")).collect();

        let merged = match self.merge_strategy {
            MergeStrategy::All => merge_all(results),
            MergeStrategy::First => merge_first(results),
        };

        Ok(merged.with_metadata(ExecutionMetadata {
            executor_id: Some(self.id.clone()),
            executor_type: Some("composite".to_string()),
            ..Default::default()
        }))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

fn merge_all(results: Vec<ExecutionResult>) -> ExecutionResult {
    let succeeded = results.iter().filter(|r| r.status == ExecutionStatus::Success).count();
    let failed = results.iter().filter(|r| r.status == ExecutionStatus::Failed).count();
    let total = results.len();

    let status = if succeeded == total {
        ExecutionStatus::Success
    } else if failed == total {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Partial
    };

    let errors: Vec<ExecutionError> = results.iter().flat_map(|r| r.errors.clone()).collect();
    let output = Value::Array(results.iter().map(|r| r.output.clone()).collect());

    ExecutionResult {
        status,
        output,
        control: crate::model::ControlDirective::cont(),
        metadata: None,
        errors,
    }
}

fn merge_first(results: Vec<ExecutionResult>) -> ExecutionResult {
    results
        .iter()
        .find(|r| r.status == ExecutionStatus::Success)
        .cloned()
        .unwrap_or_else(|| results.into_iter().next().expect("non-empty children"))
}

pub(crate) fn create(config: &ExecutorConfig, factory: Factory) -> crate::Result<Arc<dyn Executor>> {
    Ok(Arc::new(ParallelOrchestrator::new(config, &factory)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use crate::event::EventBus;
    use crate::model::{Constraints, ExecutorKind, ModeConfig, OrchestratorFields, OrchestratorMode};
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn ctx() -> ExecutionContext {
        let bus = EventBus::new();
        let emitter = bus.create_scope("e1");
        ExecutionContext::root("e1", CancellationToken::new(), emitter)
    }

    fn echo_child(id: &str, suffix: &str) -> ExecutorConfig {
        let mut extra = Map::new();
        extra.insert("template".to_string(), json!(format!("{{{{input}}}}{suffix}")));
        ExecutorConfig {
            id: id.to_string(),
            name: id.to_string(),
            kind: ExecutorKind::script(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: None,
            extra,
        }
    }

    struct Failing;
    #[async_trait]
    impl Executor for Failing {
        async fn execute(&self, _input: Value, _ctx: &ExecutionContext) -> crate::Result<ExecutionResult> {
            Err(crate::KernelError::General("boom".into()))
        }
        fn id(&self) -> &str {
            "fail"
        }
    }

    fn parallel_config(children: Vec<ExecutorConfig>, max_concurrency: Option<usize>, merge: MergeStrategy) -> ExecutorConfig {
        ExecutorConfig {
            id: "p".into(),
            name: "p".into(),
            kind: ExecutorKind::composite(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: Some(OrchestratorFields {
                mode: OrchestratorMode::Parallel,
                children,
                mode_config: ModeConfig::Parallel { max_concurrency, merge_strategy: merge },
            }),
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn positional_order_matches_config_order_regardless_of_completion() {
        let factory = Factory::with_default_orchestrators();
        let config = parallel_config(
            vec![echo_child("a", "[A]"), echo_child("b", "[B]"), echo_child("c", "[C]")],
            Some(2),
            MergeStrategy::All,
        );
        let orch = ParallelOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, json!(["x[A]", "x[B]", "x[C]"]));
    }

    #[tokio::test]
    async fn s2_one_failure_yields_partial_with_null_at_its_position() {
        let factory = Factory::with_default_orchestrators();
        let mut children = vec![echo_child("a", "[A]")];
        children.push(ExecutorConfig {
            id: "fail".into(),
            name: "fail".into(),
            kind: ExecutorKind::custom("failing"),
            description: None,
            constraints: Constraints::default(),
            orchestrator: None,
            extra: Map::new(),
        });
        children.push(echo_child("c", "[C]"));

        factory.register_atomic("failing", Arc::new(|_cfg: &ExecutorConfig| Ok(Arc::new(Failing) as Arc<dyn Executor>)));

        let config = parallel_config(children, Some(2), MergeStrategy::All);
        let orch = ParallelOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Partial);
        assert_eq!(result.output, json!(["x[A]", null, "x[C]"]));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "EXECUTION_ERROR");
    }

    #[tokio::test]
    async fn merge_first_returns_first_success() {
        let factory = Factory::with_default_orchestrators();
        let config = parallel_config(vec![echo_child("a", "[A]"), echo_child("b", "[B]")], None, MergeStrategy::First);
        let orch = ParallelOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(result.output, json!("x[A]"));
    }

    #[tokio::test]
    async fn single_child_matches_direct_execution() {
        let factory = Factory::with_default_orchestrators();
        let config = parallel_config(vec![echo_child("a", "[A]")], None, MergeStrategy::All);
        let orch = ParallelOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, json!(["x[A]"]));
    }
}
