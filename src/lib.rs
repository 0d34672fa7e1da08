//! A runtime for composing and executing agent workflows.
//!
//! A workflow is a tree of [`model::ExecutorConfig`] nodes: atomic leaves
//! (`agent`, `http`, `tool`, `script`) and composite orchestrators
//! (`serial`, `parallel`, `router`, `loop`, `dag`) that coordinate them.
//! [`runtime::Runtime`] is the entry point: it resolves a config tree
//! through an [`executor::Factory`], runs it, and reports progress through
//! an [`event::EventBus`].
//!
//! ```rust,ignore
//! use kernel::{model::ExecutorConfig, runtime::Runtime};
//!
//! let runtime = Runtime::new();
//! let result = runtime.execute(&config, serde_json::json!({"query": "hi"}), Default::default()).await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod executor;
pub mod expr;
pub mod model;
pub mod orchestrator;
pub mod runtime;
pub mod testing;

pub use error::{KernelError, Result};
pub use model::{ControlAction, ControlDirective, ExecutionResult, ExecutorConfig};
pub use runtime::Runtime;

/// Crate version, exposed as a `version()` helper for CLI front-ends.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
