//! Chooses exactly one child by rule evaluation or, with an explicit
//! router child, by delegating the choice to an `agent`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::executor::{Executor, Factory};
use crate::expr::evaluate_route_condition;
use crate::model::{ExecutionError, ExecutionResult, ExecutorConfig, RouterStrategy};
use crate::orchestrator::{resolve_children, run_child, stringify_input, ChildEntry};

pub struct RouterOrchestrator {
    id: String,
    strategy: RouterStrategy,
    rules: Vec<crate::model::RouteRule>,
    router_child_id: Option<String>,
    children: Vec<ChildEntry>,
    index: HashMap<String, usize>,
}

impl RouterOrchestrator {
    pub(crate) fn new(config: &ExecutorConfig, factory: &Factory) -> crate::Result<Self> {
        let orch = config.orchestrator.as_ref().ok_or_else(|| {
            crate::KernelError::Validation(format!("router composite '{}' has no orchestrator fields", config.id))
        })?;
        let (strategy, rules, router_child_id) = match &orch.mode_config {
            crate::model::ModeConfig::Router { strategy, rules, router_child_id } => {
                (*strategy, rules.clone(), router_child_id.clone())
            }
            _ => (RouterStrategy::Rule, Vec::new(), None),
        };
        if strategy == RouterStrategy::Llm {
            let id = router_child_id.as_ref().ok_or_else(|| {
                crate::KernelError::Validation(format!(
                    "router composite '{}' uses the llm strategy but names no routerChildId",
                    config.id
                ))
            })?;
            if !orch.children.iter().any(|c| &c.id == id) {
                return Err(crate::KernelError::Validation(format!(
                    "router composite '{}': routerChildId '{}' is not a child",
                    config.id, id
                )));
            }
        }
        let (children, index) = resolve_children(&orch.children, factory)?;
        Ok(Self {
            id: config.id.clone(),
            strategy,
            rules,
            router_child_id,
            children,
            index,
        })
    }

    fn rule_target(&self, input: &str, variables: &serde_json::Map<String, Value>) -> Option<usize> {
        for rule in &self.rules {
            if evaluate_route_condition(&rule.condition, input, variables) {
                if let Some(&idx) = self.index.get(&rule.target) {
                    return Some(idx);
                }
            }
        }
        None
    }

    async fn llm_target(&self, input: &Value, context: &ExecutionContext) -> crate::Result<usize> {
        let router_child_id = self.router_child_id.clone().expect("validated at construction");
        let router_idx = self.index[&router_child_id];
        let router_child = &self.children[router_idx];

        let options: Vec<String> = self
            .children
            .iter()
            .filter(|c| c.id != router_child_id)
            .map(|c| format!("{}: {}", c.id, c.name))
            .collect();
        let prompt = format!(
            "Choose exactly one destination id for this input.\nInput: {}\nOptions:\n{}\nRespond with only the id.",
            stringify_input(input),
            options.join("\n"),
        );

        let result = run_child(context, router_child, Value::String(prompt), Some("router")).await?;
        let chosen = stringify_input(&result.output).trim().to_string();

        if let Some(&idx) = self.index.get(&chosen) {
            if idx != router_idx {
                return Ok(idx);
            }
        }
        tracing::warn!(chosen, "llm router chose an unknown or self target, falling back to first non-router child");
        self.children
            .iter()
            .position(|c| c.id != router_child_id)
            .ok_or_else(|| crate::KernelError::Validation(format!("router composite '{}' has no routable children", self.id)))
    }
}

#[async_trait]
impl Executor for RouterOrchestrator {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        if self.children.is_empty() {
            return Ok(ExecutionResult::failed(Value::Null, vec![ExecutionError::new("NO_ROUTE", "router has no children", false)]));
        }
        context.check_cancelled()?;

        let target_idx = match self.strategy {
            RouterStrategy::Rule => {
                let input_str = stringify_input(&input);
                let variables = context.variables().to_object();
                self.rule_target(&input_str, &variables).unwrap_or(0)
            }
            RouterStrategy::Llm => self.llm_target(&input, context).await?,
        };

        let target = &self.children[target_idx];
        context.emitter().emit(
            crate::event::EventType::ExecutionProgress,
            serde_json::json!({ "action": "route", "selectedTarget": target.id }),
            context.node_id().map(|s| s.to_string()),
        );
        tracing::info!(target = %target.id, "router dispatching");

        run_child(context, target, input, Some("router")).await
    }

    fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) fn create(config: &ExecutorConfig, factory: Factory) -> crate::Result<Arc<dyn Executor>> {
    Ok(Arc::new(RouterOrchestrator::new(config, &factory)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use crate::event::EventBus;
    use crate::model::{Constraints, ExecutorKind, ModeConfig, OrchestratorFields, OrchestratorMode, RouteRule};
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

    #[tokio::test]
    async fn s3_first_matching_rule_wins() {
        let factory = Factory::with_default_orchestrators();
        let config = ExecutorConfig {
            id: "r".into(),
            name: "r".into(),
            kind: ExecutorKind::composite(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: Some(OrchestratorFields {
                mode: OrchestratorMode::Router,
                children: vec![
                    echo_child("greet", "[greet]"),
                    echo_child("triage", "[triage]"),
                    echo_child("fallback", "[fallback]"),
                ],
                mode_config: ModeConfig::Router {
                    strategy: RouterStrategy::Rule,
                    rules: vec![
                        RouteRule { condition: "startsWith:hi".into(), target: "greet".into() },
                        RouteRule { condition: "contains:bug".into(), target: "triage".into() },
                    ],
                    router_child_id: None,
                },
            }),
            extra: Map::new(),
        };
        let orch = RouterOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!("hi there"), &ctx()).await.unwrap();
        assert_eq!(result.output, json!("hi there[greet]"));
    }

    #[tokio::test]
    async fn no_match_falls_back_to_first_child() {
        let factory = Factory::with_default_orchestrators();
        let config = ExecutorConfig {
            id: "r".into(),
            name: "r".into(),
            kind: ExecutorKind::composite(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: Some(OrchestratorFields {
                mode: OrchestratorMode::Router,
                children: vec![echo_child("greet", "[greet]"), echo_child("triage", "[triage]")],
                mode_config: ModeConfig::Router {
                    strategy: RouterStrategy::Rule,
                    rules: vec![RouteRule { condition: "contains:bug".into(), target: "triage".into() }],
                    router_child_id: None,
                },
            }),
            extra: Map::new(),
        };
        let orch = RouterOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!("nothing matches"), &ctx()).await.unwrap();
        assert_eq!(result.output, json!("nothing matches[greet]"));
    }

    #[tokio::test]
    async fn no_children_is_no_route() {
        let factory = Factory::with_default_orchestrators();
        let config = ExecutorConfig {
            id: "r".into(),
            name: "r".into(),
            kind: ExecutorKind::composite(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: Some(OrchestratorFields {
                mode: OrchestratorMode::Router,
                children: vec![],
                mode_config: ModeConfig::Router { strategy: RouterStrategy::Rule, rules: vec![], router_child_id: None },
            }),
            extra: Map::new(),
        };
        let orch = RouterOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(result.status, crate::model::ExecutionStatus::Failed);
        assert_eq!(result.errors[0].code, "NO_ROUTE");
    }

    struct FixedAgent(String);
    #[async_trait]
    impl Executor for FixedAgent {
        async fn execute(&self, _input: Value, _ctx: &ExecutionContext) -> crate::Result<ExecutionResult> {
            Ok(ExecutionResult::success(json!(self.0)))
        }
        fn id(&self) -> &str {
            "router_agent"
        }
    }

    #[tokio::test]
    async fn llm_strategy_dispatches_chosen_child() {
        let factory = Factory::with_default_orchestrators();
        factory.register_atomic(
            "router_agent",
            Arc::new(|_cfg: &ExecutorConfig| Ok(Arc::new(FixedAgent("triage".to_string())) as Arc<dyn Executor>)),
        );
        let config = ExecutorConfig {
            id: "r".into(),
            name: "r".into(),
            kind: ExecutorKind::composite(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: Some(OrchestratorFields {
                mode: OrchestratorMode::Router,
                children: vec![
                    ExecutorConfig {
                        id: "router".into(),
                        name: "router".into(),
                        kind: ExecutorKind::custom("router_agent"),
                        description: None,
                        constraints: Constraints::default(),
                        orchestrator: None,
                        extra: Map::new(),
                    },
                    echo_child("greet", "[greet]"),
                    echo_child("triage", "[triage]"),
                ],
                mode_config: ModeConfig::Router {
                    strategy: RouterStrategy::Llm,
                    rules: vec![],
                    router_child_id: Some("router".into()),
                },
            }),
            extra: Map::new(),
        };
        let orch = RouterOrchestrator::new(&config, &factory).unwrap();
        let result = orch.execute(json!("x"), &ctx()).await.unwrap();
        assert_eq!(result.output, json!("x[triage]"));
    }
}
