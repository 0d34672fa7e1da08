//! The configuration and result data model shared by every node kind.
//!
//! These types are the wire shape exchanged with callers: configs go in,
//! results and events come out. Everything here is plain data — no
//! behavior lives on these types beyond small accessors and constructors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// The executor kind named in a config's `type` field.
///
/// The four atomic kinds and `composite` are well-known and drive the
/// runtime's own behavior; everything else is an opaque string the
/// factory resolves through its custom-type registration. This is
/// a thin wrapper rather than a closed enum so `Factory::register_atomic`
/// can add kinds the core crate has never heard of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutorKind(pub String);

impl ExecutorKind {
    pub const AGENT: &'static str = "agent";
    pub const HTTP: &'static str = "http";
    pub const TOOL: &'static str = "tool";
    pub const SCRIPT: &'static str = "script";
    pub const COMPOSITE: &'static str = "composite";

    pub fn agent() -> Self {
        Self(Self::AGENT.to_string())
    }

    pub fn http() -> Self {
        Self(Self::HTTP.to_string())
    }

    pub fn tool() -> Self {
        Self(Self::TOOL.to_string())
    }

    pub fn script() -> Self {
        Self(Self::SCRIPT.to_string())
    }

    pub fn composite() -> Self {
        Self(Self::COMPOSITE.to_string())
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn is_composite(&self) -> bool {
        self.0 == Self::COMPOSITE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-node resource constraints. All optional; absence means "unbounded"
/// at this node (the orchestrator or runtime default applies instead).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(default, rename = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default, rename = "maxTokens")]
    pub max_tokens: Option<usize>,
}

/// The persisted shape fed to the [`crate::executor::Factory`].
///
/// Unknown fields are preserved via `extra` but otherwise ignored, per
/// unrecognized fields, which are preserved but ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ExecutorKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub constraints: Constraints,

    /// Orchestrator-only fields. Present iff `kind == Composite`.
    #[serde(flatten)]
    pub orchestrator: Option<OrchestratorFields>,

    /// Type-specific fields for atomic executors (agent/http/tool/script),
    /// kept opaque here since their wire-level transports are external
    /// collaborators.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ExecutorConfig {
    pub fn atomic(id: impl Into<String>, name: impl Into<String>, kind: ExecutorKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            description: None,
            constraints: Constraints::default(),
            orchestrator: None,
            extra: HashMap::new(),
        }
    }

    pub fn composite(
        id: impl Into<String>,
        name: impl Into<String>,
        mode: OrchestratorMode,
        children: Vec<ExecutorConfig>,
        mode_config: ModeConfig,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ExecutorKind::composite(),
            description: None,
            constraints: Constraints::default(),
            orchestrator: Some(OrchestratorFields {
                mode,
                children,
                mode_config,
            }),
            extra: HashMap::new(),
        }
    }

    /// Validate the config tree before execution starts. Returns the
    /// first structural problem found: duplicate child ids, unknown
    /// mode/type combinations are caught by the factory instead.
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.is_empty() {
            return Err(crate::KernelError::Validation("executor id must not be empty".into()));
        }
        if let Some(orch) = &self.orchestrator {
            let mut seen = std::collections::HashSet::new();
            for child in &orch.children {
                if !seen.insert(child.id.as_str()) {
                    return Err(crate::KernelError::Validation(format!(
                        "duplicate child id '{}' in composite '{}'",
                        child.id, self.id
                    )));
                }
                child.validate()?;
            }
        }
        Ok(())
    }
}

/// The fields an [`ExecutorConfig`] carries when `kind == Composite`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorFields {
    pub mode: OrchestratorMode,
    #[serde(default)]
    pub children: Vec<ExecutorConfig>,
    #[serde(rename = "modeConfig")]
    pub mode_config: ModeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorMode {
    Serial,
    Parallel,
    Router,
    Loop,
    Dag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    All,
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterStrategy {
    Rule,
    Llm,
}

/// One rule in a `router` composite's rule list. `condition` is parsed by
/// [`crate::expr::RouteCondition`] — one of `contains:`, `startsWith:`,
/// `equals:`, `regex:`, `var:`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub condition: String,
    pub target: String,
}

/// One edge in a `dag` composite, `from` must complete before `to` starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagEdge {
    pub from: String,
    pub to: String,
}

/// Mode-specific configuration, discriminated by [`OrchestratorMode`].
/// Every variant has sane defaults so a minimal JSON
/// config (e.g. `{"mode": "parallel"}`) is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeConfig {
    Serial,
    Parallel {
        #[serde(default, rename = "maxConcurrency")]
        max_concurrency: Option<usize>,
        #[serde(default = "default_merge_strategy", rename = "mergeStrategy")]
        merge_strategy: MergeStrategy,
    },
    Router {
        #[serde(default = "default_router_strategy")]
        strategy: RouterStrategy,
        #[serde(default)]
        rules: Vec<RouteRule>,
        /// Explicit router agent child id for the `llm` strategy.
        /// Resolves an ambiguity in LLM-driven routing: rather than picking "the
        /// only agent child" implicitly, callers name it.
        #[serde(default, rename = "routerChildId")]
        router_child_id: Option<String>,
    },
    Loop {
        #[serde(rename = "maxIterations")]
        max_iterations: u32,
        #[serde(default, rename = "exitCondition")]
        exit_condition: Option<String>,
        #[serde(default, rename = "iterationDelayMs")]
        iteration_delay_ms: Option<u64>,
        #[serde(default, rename = "collectResults")]
        collect_results: bool,
    },
    Dag {
        #[serde(default)]
        edges: Vec<DagEdge>,
        #[serde(default, rename = "maxConcurrency")]
        max_concurrency: Option<usize>,
    },
}

fn default_merge_strategy() -> MergeStrategy {
    MergeStrategy::All
}

fn default_router_strategy() -> RouterStrategy {
    RouterStrategy::Rule
}

/// The branching intent a node returns alongside its data output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Continue,
    End,
    Route,
    Retry,
    Pause,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlDirective {
    pub action: ControlAction,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, rename = "retryCount")]
    pub retry_count: u32,
}

impl ControlDirective {
    pub fn cont() -> Self {
        Self { action: ControlAction::Continue, target: None, reason: None, retry_count: 0 }
    }

    pub fn end() -> Self {
        Self { action: ControlAction::End, target: None, reason: None, retry_count: 0 }
    }

    pub fn route(target: impl Into<String>) -> Self {
        Self {
            action: ControlAction::Route,
            target: Some(target.into()),
            reason: None,
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failed,
    Cancelled,
}

/// One error entry inside an [`ExecutionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
    #[serde(default)]
    pub context: Option<Value>,
}

impl ExecutionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self { code: code.into(), message: message.into(), recoverable, context: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    #[serde(default, rename = "executorId")]
    pub executor_id: Option<String>,
    #[serde(default, rename = "executorType")]
    pub executor_type: Option<String>,
    #[serde(default, rename = "startTime")]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, rename = "endTime")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, rename = "durationMs")]
    pub duration_ms: Option<u64>,
    #[serde(default, rename = "retryCount")]
    pub retry_count: u32,
    /// Free-form extra fields (token usage, DAG node counts, ...).
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// What every executor returns, atomic or composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: Value,
    pub control: ControlDirective,
    #[serde(default)]
    pub metadata: Option<ExecutionMetadata>,
    #[serde(default)]
    pub errors: Vec<ExecutionError>,
}

impl ExecutionResult {
    pub fn success(output: Value) -> Self {
        Self { status: ExecutionStatus::Success, output, control: ControlDirective::cont(), metadata: None, errors: vec![] }
    }

    pub fn failed(output: Value, errors: Vec<ExecutionError>) -> Self {
        Self { status: ExecutionStatus::Failed, output, control: ControlDirective::end(), metadata: None, errors }
    }

    pub fn cancelled() -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            output: Value::Null,
            control: ControlDirective::end(),
            metadata: None,
            errors: vec![],
        }
    }

    pub fn with_metadata(mut self, metadata: ExecutionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_control(mut self, control: ControlDirective) -> Self {
        self.control = control;
        self
    }

    /// Whether the producer of this result flagged it as eligible for
    /// inline retry: `recoverable = true` on at least one
    /// error.
    pub fn is_recoverable(&self) -> bool {
        self.errors.iter().any(|e| e.recoverable)
    }
}
