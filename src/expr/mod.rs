//! Restricted, sandboxed expression evaluation.
//!
//! Loop-exit and router conditions are evaluated by a bounded grammar:
//! comparisons, boolean connectives, member access, and literal constants
//! only — no external calls, no loops, no way to escape the named
//! environment it is handed. A malformed expression is never fatal: both
//! entry points log a warning and evaluate to `false`.

mod boolean;
mod route;

pub use boolean::evaluate_boolean;
pub use route::{evaluate_route_condition, RouteCondition};

/// Evaluate a loop `exitCondition` or router `expression:` condition
/// against a named environment. Never fails: parse or evaluation errors
/// are logged and treated as `false`.
pub fn evaluate(expression: &str, env: &serde_json::Map<String, serde_json::Value>) -> bool {
    match evaluate_boolean(expression, env) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(expression, error = %err, "malformed expression, treating as false");
            false
        }
    }
}
