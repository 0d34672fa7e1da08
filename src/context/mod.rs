//! The per-invocation runtime environment: identifiers, cancellation,
//! lexically chained variables, and a scoped emitter.
//!
//! A root [`ExecutionContext`] is created once per top-level run by
//! [`crate::runtime::Runtime`]; every orchestrator calls
//! [`ExecutionContext::create_child`] before dispatching a child so that
//! the child's variable writes never leak back to its siblings or
//! parent, while still sharing the execution id, emitter, and
//! cancellation token.

mod cancellation;
mod variables;

pub use cancellation::CancellationToken;
pub use variables::VariableScope;

use crate::event::ScopedEmitter;

/// Runtime state threaded through one node invocation.
#[derive(Clone)]
pub struct ExecutionContext {
    execution_id: String,
    node_id: Option<String>,
    depth: usize,
    cancellation: CancellationToken,
    variables: VariableScope,
    emitter: ScopedEmitter,
}

impl ExecutionContext {
    /// Construct the root context for a new execution.
    pub fn root(execution_id: impl Into<String>, cancellation: CancellationToken, emitter: ScopedEmitter) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: None,
            depth: 0,
            cancellation,
            variables: VariableScope::root(),
            emitter,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn variables(&self) -> &VariableScope {
        &self.variables
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn emitter(&self) -> &ScopedEmitter {
        &self.emitter
    }

    /// Derive a context for a child invocation: same execution id,
    /// emitter, and cancellation token, a fresh variable frame, and an
    /// advanced node id/depth.
    pub fn create_child(&self, node_id: impl Into<String>) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            node_id: Some(node_id.into()),
            depth: self.depth + 1,
            cancellation: self.cancellation.clone(),
            variables: self.variables.child(),
            emitter: self.emitter.clone(),
        }
    }

    /// Raise [`crate::KernelError::Cancelled`] if the token has been set.
    /// Orchestrators call this at every loop boundary, before dispatching
    /// a child, and inside hot read loops.
    pub fn check_cancelled(&self) -> crate::Result<()> {
        if self.cancellation.is_cancelled() {
            Err(crate::KernelError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn current_node_id(&self) -> String {
        self.node_id.clone().unwrap_or_default()
    }

    pub fn emit_thinking(&self, delta: &str) {
        self.emitter.emit_thinking(&self.current_node_id(), delta);
    }

    pub fn emit_content(&self, delta: &str) {
        self.emitter.emit_content(&self.current_node_id(), delta);
    }

    pub fn emit_error(&self, err: &crate::KernelError) {
        self.emitter.emit_error(&self.current_node_id(), err);
    }

    pub fn emit_node_status(&self, status: &str) {
        self.emitter.emit_node_status(&self.current_node_id(), status);
    }
}
