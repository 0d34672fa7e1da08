//! Runs children in config order, piping each child's `output` into the
//! next child's `input`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::executor::{Executor, Factory};
use crate::model::{ControlAction, ExecutionResult, ExecutorConfig};
use crate::orchestrator::{resolve_children, run_child, ChildEntry};

pub struct SerialOrchestrator {
    id: String,
    max_retries: u32,
    children: Vec<ChildEntry>,
    index: HashMap<String, usize>,
}

impl SerialOrchestrator {
    pub(crate) fn new(config: &ExecutorConfig, factory: &Factory) -> crate::Result<Self> {
        let orch = config.orchestrator.as_ref().ok_or_else(|| {
            crate::KernelError::Validation(format!("serial composite '{}' has no orchestrator fields", config.id))
        })?;
        let (children, index) = resolve_children(&orch.children, factory)?;
        Ok(Self {
            id: config.id.clone(),
            max_retries: config.constraints.max_retries,
            children,
            index,
        })
    }
}

#[async_trait]
impl Executor for SerialOrchestrator {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        if self.children.is_empty() {
            return Ok(ExecutionResult::success(input));
        }

        let mut current_input = input;
        let mut idx = 0usize;
        let mut last_result: Option<ExecutionResult> = None;
        let mut retry_counts: HashMap<usize, u32> = HashMap::new();

        loop {
            context.check_cancelled()?;
            let Some(child) = self.children.get(idx) else {
                break;
            };

            match run_child(context, child, current_input.clone(), None).await {
                Ok(result) => {
                    let retry_requested = result.control.action == ControlAction::Retry;
                    let recoverable = result.is_recoverable();
                    let control = result.control.clone();
                    current_input = result.output.clone();
                    last_result = Some(result);

                    if retry_requested {
                        let count = retry_counts.entry(idx).or_insert(0);
                        if recoverable && *count < self.max_retries {
                            *count += 1;
                            tracing::debug!(child_id = %child.id, attempt = *count, "retrying child after retry directive");
                            continue;
                        }
                    }

                    match control.action {
                        ControlAction::End | ControlAction::Cancel => break,
                        ControlAction::Route => {
                            let next = control
                                .target
                                .as_ref()
                                .and_then(|target| self.index.get(target).copied())
                                .unwrap_or(idx + 1);
                            idx = next;
                        }
                        ControlAction::Pause => break,
                        ControlAction::Continue | ControlAction::Retry => idx += 1,
                    }
                }
                Err(crate::KernelError::Cancelled) => return Err(crate::KernelError::Cancelled),
                Err(err) => {
                    let recoverable = last_result.as_ref().map(|r| r.is_recoverable()).unwrap_or(false);
                    let count = retry_counts.entry(idx).or_insert(0);
                    if recoverable && *count < self.max_retries {
                        *count += 1;
                        tracing::debug!(child_id = %child.id, attempt = *count, "retrying child after thrown error");
                        continue;
                    }
                    tracing::error!(child_id = %child.id, error = %err, "serial composite aborted by non-recoverable error");
                    return Err(err);
                }
            }
        }

        Ok(last_result.unwrap_or_else(|| ExecutionResult::success(current_input)))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) fn create(config: &ExecutorConfig, factory: Factory) -> crate::Result<Arc<dyn Executor>> {
    Ok(Arc::new(SerialOrchestrator::new(config, &factory)?))
}
