//! The `script` atomic executor: a deterministic, side-effect-free
//! template transform — a deterministic tool, alongside `agent`
//! and `http`). Reuses the same `{{input}}`/`{{var.NAME}}` interpolation
//! grammar as `http` rather than introducing a second template
//! language.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::executor::http::interpolate_plain;
use crate::executor::Executor;
use crate::model::{ExecutionMetadata, ExecutionResult};

pub struct ScriptExecutor {
    id: String,
    template: String,
}

impl ScriptExecutor {
    pub fn new(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self { id: id.into(), template: template.into() }
    }
}

#[async_trait]
impl Executor for ScriptExecutor {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        context.check_cancelled()?;
        let input_str = match &input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let variables = context.variables().to_object();
        let rendered = interpolate_plain(&self.template, &input_str, &variables);
        Ok(ExecutionResult::success(Value::String(rendered)).with_metadata(ExecutionMetadata {
            executor_id: Some(self.id.clone()),
            executor_type: Some("script".to_string()),
            ..Default::default()
        }))
    }

    fn id(&self) -> &str {
        &self.id
    }
}
