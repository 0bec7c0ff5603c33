//! Error taxonomy for the execution engine.
//!
//! Every error here is run-fatal: the executor records it into the failing
//! step's result and halts. Nothing is thrown past the executor — callers
//! observe failure through `ExecutionState`, not exception propagation.

use thiserror::Error;

/// Failure raised by the parameter resolver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// The placeholder names a step with no recorded result: the step does
    /// not exist, failed, or sits at the same or a later position in the
    /// run. Forward references always land here, never on a stale value.
    #[error("unresolved reference '{placeholder}': step '{step_id}' has no recorded result")]
    UnresolvedReference { placeholder: String, step_id: String },

    /// The referenced step completed, but the dotted path does not exist in
    /// its result.
    #[error("missing field '{field_path}' in result of step '{step_id}'")]
    MissingField { step_id: String, field_path: String },

    /// The placeholder names a workflow input that was not supplied.
    #[error("missing workflow input '{name}'")]
    MissingInput { name: String },
}

/// Failure returned by an endpoint-invocation collaborator.
///
/// Carries only a human-readable message: the engine does not distinguish
/// network errors from non-2xx statuses beyond the text, by contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct InvokeError {
    pub message: String,
}

impl InvokeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
