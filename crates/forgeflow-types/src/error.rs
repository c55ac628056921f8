//! Error taxonomy shared across the workspace.
//!
//! Four families: plan-shape validation, restricted-interpreter evaluation,
//! step execution, and infrastructure. Plan-level errors never reach
//! execution; step-level errors are isolated to their subgraph. Messages are
//! user-safe -- no internal paths, stack traces, or secrets.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed plan shape or schema violation. Always user-visible, never
/// retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("step '{step_id}': {reason}")]
pub struct ValidationError {
    /// The step the problem was detected on ("<plan>" for plan-wide issues).
    pub step_id: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            reason: reason.into(),
        }
    }

    /// A plan-wide problem not attributable to a single step.
    pub fn plan(reason: impl Into<String>) -> Self {
        Self::new("<plan>", reason)
    }
}

/// Restricted-interpreter rejection, with source position for tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{file}:{line}:{column}: {message}")]
pub struct EvaluationError {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl EvaluationError {
    pub fn new(file: impl Into<String>, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            message: message.into(),
        }
    }
}

/// A step failed or timed out. Recorded on the step execution, propagated as
/// `skipped` to dependents, surfaced in run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ExecutionError {
    #[error("step '{step_id}' failed: {reason}")]
    StepFailed { step_id: String, reason: String },

    #[error("step '{step_id}' timed out after {timeout_secs}s")]
    StepTimedOut { step_id: String, timeout_secs: u64 },

    #[error("step '{step_id}' output rejected: {violation}")]
    OutputRejected {
        step_id: String,
        violation: crate::schema::SchemaViolation,
    },
}

/// Lost worker or heartbeat timeout. Retried by reassignment up to a bounded
/// attempt count before the step is marked failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum InfrastructureError {
    #[error("worker '{worker_id}' was lost while running step '{step_id}'")]
    WorkerLost { worker_id: String, step_id: String },

    #[error("worker '{worker_id}' missed its heartbeat deadline")]
    HeartbeatTimeout { worker_id: String },

    #[error("no worker satisfies requirements [{}]", requires.join(", "))]
    NoMatchingWorker { requires: Vec<String> },
}

/// Errors from repository operations (used by trait definitions in
/// forgeflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
