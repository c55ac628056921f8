//! Runner pool manager: worker registry, liveness, and step assignment.
//!
//! The pool is the sole owner of worker records. The engine submits
//! [`StepRequest`]s and receives [`PoolEvent`]s back; it never mutates
//! worker state directly.

mod manager;
mod worker;

pub use manager::PoolManager;
pub use worker::{AssignRejected, StepAssignment, WorkerHandle, WorkerReporter};

use forgeflow_types::plan::StepDefinition;
use forgeflow_types::run::{LogEvent, StepResult};
use forgeflow_types::worker::WorkerId;
use uuid::Uuid;

/// A ready step the engine wants executed. The pool picks the worker and
/// applies the sandbox floor; the request itself carries no sandbox.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub run_id: Uuid,
    pub step_execution_id: Uuid,
    pub step: StepDefinition,
    pub attempt: u32,
}

/// Callbacks from the pool to the engine.
#[derive(Debug)]
pub enum PoolEvent {
    /// A worker accepted the assignment and is executing.
    StepStarted {
        run_id: Uuid,
        step_id: String,
        attempt: u32,
        worker_id: WorkerId,
    },
    /// A line of step output, in worker-side sequence order.
    StepLog(LogEvent),
    /// The worker finished the step (success, failure, or cancelled).
    StepCompleted {
        run_id: Uuid,
        step_id: String,
        attempt: u32,
        result: StepResult,
    },
    /// The assigned worker went unhealthy while the step was running.
    StepLost {
        run_id: Uuid,
        step_id: String,
        attempt: u32,
        worker_id: WorkerId,
    },
    /// No registered worker can ever satisfy the step's requirements.
    StepUnassignable {
        run_id: Uuid,
        step_id: String,
        attempt: u32,
        requires: Vec<String>,
    },
}

impl PoolEvent {
    /// The run this callback belongs to; used to route it to the right
    /// controller.
    pub fn run_id(&self) -> Uuid {
        match self {
            PoolEvent::StepStarted { run_id, .. }
            | PoolEvent::StepCompleted { run_id, .. }
            | PoolEvent::StepLost { run_id, .. }
            | PoolEvent::StepUnassignable { run_id, .. } => *run_id,
            PoolEvent::StepLog(event) => event.run_id,
        }
    }
}
