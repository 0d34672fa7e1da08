//! Crate-wide error type.
//!
//! Most failures are captured inside an [`crate::model::ExecutionResult`] rather than
//! propagated as Rust errors (orchestrators catch and record them), but a
//! handful of situations — bad configuration, a full-blown factory lookup
//! miss, cooperative cancellation — must still escape as a `Result::Err`
//! before any result value exists to carry them.

use thiserror::Error;

/// Errors surfaced by the kernel itself, as opposed to errors produced by
/// the workflow being executed (those live in [`crate::model::ExecutionResult::errors`]).
#[derive(Debug, Error)]
pub enum KernelError {
    /// Configuration failed validation before execution could start.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Cooperative cancellation was observed at a suspension point.
    #[error("execution cancelled")]
    Cancelled,

    /// A DAG orchestrator's edges describe a cycle, or reference nothing
    /// that can be resolved.
    #[error("invalid DAG: {0}")]
    InvalidDag(String),

    /// The factory was asked for an executor type/mode it has no creator
    /// registered for.
    #[error("unsupported executor type or mode: {0}")]
    UnsupportedType(String),

    /// A child id referenced (router target, DAG edge endpoint) does not
    /// exist among a composite's children.
    #[error("unknown child id: {0}")]
    UnknownChild(String),

    /// Outbound transport (model driver, HTTP) failed.
    #[error("driver error (status={status:?}): {message}")]
    Driver {
        message: String,
        status: Option<u16>,
    },

    /// Generic catch-all, mirroring `OrchestratorError::General` in the
    /// teacher crate.
    #[error("kernel error: {0}")]
    General(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<anyhow::Error> for KernelError {
    /// Lets a transport/driver implementation (an external collaborator,
    /// typically already returning `anyhow::Result`) convert its failure
    /// into the kernel's own error type at the boundary, the same way
    /// `OrcaError::from(anyhow::Error)` flattens arbitrary upstream errors
    /// into one string-carrying variant.
    fn from(err: anyhow::Error) -> Self {
        KernelError::General(err.to_string())
    }
}

impl KernelError {
    /// Whether this error, surfaced by a driver, should be treated as
    /// recoverable: HTTP status >= 500, or 429.
    pub fn is_recoverable_driver_error(&self) -> bool {
        match self {
            KernelError::Driver { status: Some(s), .. } => *s >= 500 || *s == 429,
            _ => false,
        }
    }
}

/// Result type used throughout the kernel.
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_errors_flatten_into_general() {
        let err: anyhow::Error = anyhow::anyhow!("transport unreachable");
        let kernel_err: KernelError = err.into();
        assert!(matches!(kernel_err, KernelError::General(msg) if msg == "transport unreachable"));
    }

    #[test]
    fn driver_error_recoverability_matches_status_heuristic() {
        assert!(KernelError::Driver { message: "x".into(), status: Some(500) }.is_recoverable_driver_error());
        assert!(KernelError::Driver { message: "x".into(), status: Some(429) }.is_recoverable_driver_error());
        assert!(!KernelError::Driver { message: "x".into(), status: Some(404) }.is_recoverable_driver_error());
    }
}
