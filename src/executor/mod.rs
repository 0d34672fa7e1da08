//! The common shape every node implements, plus the factory/registry that
//! turns an [`ExecutorConfig`] tree into runnable instances.
//!
//! Atomic executors (`agent`, `http`, `tool`, `script`) live alongside the
//! factory since they are the leaves the factory's atomic map resolves to;
//! the composite side (`serial`/`parallel`/`router`/`loop`/`dag`) lives in
//! [`crate::orchestrator`] and is wired in by [`Factory::with_default_orchestrators`].

pub mod agent;
pub mod factory;
pub mod http;
pub mod retry;
pub mod script;
pub mod tool;

pub use factory::Factory;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::model::ExecutionResult;

/// Common contract implemented by every node, atomic or composite.
///
/// `execute` never throws for ordinary failures — those come back as a
/// `failed`/`partial` [`ExecutionResult`]. The only error this
/// trait's `Result` carries is [`crate::KernelError::Cancelled`] (cooperative
/// cancellation, which must propagate) or a handful of construction-time
/// failures that have no result to carry them yet.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        input: serde_json::Value,
        context: &ExecutionContext,
    ) -> crate::Result<ExecutionResult>;

    /// The config id this instance was built from, used by the factory's
    /// cache and by composites doing result lookups by id.
    fn id(&self) -> &str;
}
