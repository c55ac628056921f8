//! Run and step-execution tracking types.
//!
//! A `Run` is one execution attempt of a plan against concrete inputs. It
//! owns one `StepExecution` per plan step, created lazily as dependencies
//! resolve. Only the execution engine mutates these records; workers report
//! results and the engine applies the transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One execution attempt of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// UUIDv7 assigned at admission.
    pub id: Uuid,
    /// Content hash of the plan being executed.
    pub plan_hash: String,
    /// Concrete inputs, already validated against the plan input schema.
    pub inputs: serde_json::Value,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    /// User-safe failure summary, set when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// StepExecution
// ---------------------------------------------------------------------------

/// The per-step execution record within a run.
///
/// Transitions monotonically through `StepExecutionStatus` and is never
/// resurrected after a terminal state -- an explicit re-run creates a new
/// `Run` (and fresh records), not a new attempt on this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// UUIDv7 assigned when the step first becomes ready.
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: String,
    pub status: StepExecutionStatus,
    /// Worker currently (or last) assigned to this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<String>,
    /// Assignment attempt count (bumped on infrastructure re-assignment).
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Process exit code for shell steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Kind-specific structured output, referenced by dependent steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// User-safe failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lifecycle of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    /// Waiting on unfinished dependencies.
    Pending,
    /// All dependencies succeeded; waiting for a worker slot.
    Ready,
    /// Assigned and executing on a worker.
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    /// An upstream dependency failed or was cancelled.
    Skipped,
}

impl StepExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepExecutionStatus::Succeeded
                | StepExecutionStatus::Failed
                | StepExecutionStatus::TimedOut
                | StepExecutionStatus::Cancelled
                | StepExecutionStatus::Skipped
        )
    }
}

// ---------------------------------------------------------------------------
// StepResult (worker report)
// ---------------------------------------------------------------------------

/// What a worker reports back when a step finishes on its side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// User-safe failure detail for non-success outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Worker-side outcome of a step process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
    Cancelled,
}

// ---------------------------------------------------------------------------
// LogEvent
// ---------------------------------------------------------------------------

/// One line of step output, ordered by `sequence` within `(run_id, step_id)`.
///
/// Sequence numbers, not wall-clock, determine consumer-visible order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub run_id: Uuid,
    pub step_id: String,
    pub sequence: u64,
    pub stream: LogStream,
    pub line: String,
}

/// Which output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
