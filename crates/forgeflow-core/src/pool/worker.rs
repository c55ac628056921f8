//! The worker protocol: what the pool asks of a worker, and how the worker
//! reports back.

use forgeflow_types::plan::StepDefinition;
use forgeflow_types::run::{LogEvent, LogStream, StepResult};
use forgeflow_types::worker::{SandboxSpec, WorkerId};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::manager::WorkerMessage;

/// Everything a worker needs to execute one step. The sandbox is already
/// merged (pool floor tightened by step overrides).
#[derive(Debug, Clone)]
pub struct StepAssignment {
    pub run_id: Uuid,
    pub step_execution_id: Uuid,
    pub step: StepDefinition,
    pub attempt: u32,
    pub sandbox: SandboxSpec,
}

/// The worker declined the assignment; the pool tries the next candidate.
#[derive(Debug, Clone, thiserror::Error)]
#[error("assignment rejected: {reason}")]
pub struct AssignRejected {
    pub reason: String,
}

/// A sandboxed execution worker as the pool sees it.
///
/// `assign` must return quickly (accept/reject); the actual execution runs
/// in the background and reports through the [`WorkerReporter`]. `cancel`
/// is best-effort: the engine keeps its own deadline regardless.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkerHandle: Send + Sync + 'static {
    fn assign(
        &self,
        assignment: StepAssignment,
        reporter: WorkerReporter,
    ) -> impl std::future::Future<Output = Result<(), AssignRejected>> + Send;

    fn cancel(
        &self,
        step_execution_id: Uuid,
    ) -> impl std::future::Future<Output = ()> + Send;
}

/// Per-assignment report channel handed to the worker.
///
/// Carries the assignment identity so a worker cannot misattribute results
/// or logs to another step.
#[derive(Debug, Clone)]
pub struct WorkerReporter {
    pub(super) worker_id: WorkerId,
    pub(super) run_id: Uuid,
    pub(super) step_id: String,
    pub(super) attempt: u32,
    pub(super) tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerReporter {
    /// Emit one log line. `sequence` is the worker-side per-step counter.
    pub fn log(&self, sequence: u64, stream: LogStream, line: impl Into<String>) {
        let _ = self.tx.send(WorkerMessage::Log(LogEvent {
            run_id: self.run_id,
            step_id: self.step_id.clone(),
            sequence,
            stream,
            line: line.into(),
        }));
    }

    /// Report the final result. Exactly one report per assignment; the
    /// engine treats duplicates idempotently anyway.
    pub fn report(&self, result: StepResult) {
        let _ = self.tx.send(WorkerMessage::Completed {
            worker_id: self.worker_id.clone(),
            run_id: self.run_id,
            step_id: self.step_id.clone(),
            attempt: self.attempt,
            result,
        });
    }
}
