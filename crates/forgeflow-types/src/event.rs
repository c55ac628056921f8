//! Event types for the run event bus.
//!
//! `RunEvent` is broadcast by the execution engine (its sole publisher) to
//! external consumers such as CLI watchers and UI streams. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::{LogEvent, RunStatus, StepExecutionStatus};

/// Events emitted during run execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run was admitted and started executing.
    RunStarted {
        run_id: Uuid,
        plan_hash: String,
        plan_name: String,
    },

    /// A step began executing on a worker.
    StepStarted {
        run_id: Uuid,
        step_id: String,
        worker_id: String,
        attempt: u32,
    },

    /// One ordered line of step output.
    StepLog { event: LogEvent },

    /// A step reached a terminal state.
    StepCompleted {
        run_id: Uuid,
        step_id: String,
        status: StepExecutionStatus,
        /// User-safe failure reason for non-success terminals.
        error: Option<String>,
    },

    /// The run finished successfully.
    RunCompleted { run_id: Uuid, duration_ms: u64 },

    /// The run failed; `error` names the failing step and a safe message.
    RunFailed { run_id: Uuid, error: String },

    /// The run was cancelled on explicit request.
    RunCancelled { run_id: Uuid },
}

impl RunEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::StepStarted { run_id, .. }
            | RunEvent::StepCompleted { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. }
            | RunEvent::RunFailed { run_id, .. }
            | RunEvent::RunCancelled { run_id } => *run_id,
            RunEvent::StepLog { event } => event.run_id,
        }
    }

    /// Whether this event marks the run's terminal transition.
    pub fn is_run_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::RunCompleted { .. } | RunEvent::RunFailed { .. } | RunEvent::RunCancelled { .. }
        )
    }

    /// The run status implied by a terminal event, if any.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            RunEvent::RunCompleted { .. } => Some(RunStatus::Succeeded),
            RunEvent::RunFailed { .. } => Some(RunStatus::Failed),
            RunEvent::RunCancelled { .. } => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}
