//! The DAG execution engine.
//!
//! One [`ExecutionEngine`] per process. Each admitted run gets its own
//! [`RunController`] actor: a single task owning all state for that run, fed
//! by an mpsc command loop, so transitions within a run are serialized while
//! different runs progress fully in parallel. Worker placement is delegated
//! to the pool through the [`StepDispatcher`] seam; results come back as
//! [`PoolEvent`]s routed by run id.

mod engine;
mod logs;
mod run;
mod state;

pub use engine::{ExecutionEngine, StartRunError};
pub use logs::LogReorderBuffer;
pub use state::is_legal;

use uuid::Uuid;

use crate::pool::{PoolManager, StepRequest, WorkerHandle};

/// How the engine hands ready steps to the pool. The pool implements this;
/// engine tests substitute stubs.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StepDispatcher: Send + Sync + 'static {
    /// Submit a ready step for assignment.
    fn submit(&self, request: StepRequest) -> impl std::future::Future<Output = ()> + Send;

    /// Best-effort cancel of a running step's worker process.
    fn cancel_step(&self, run_id: Uuid, step_id: &str) -> impl std::future::Future<Output = ()> + Send;

    /// Withdraw a submission that no longer needs a worker.
    fn discard_queued(&self, run_id: Uuid, step_id: &str) -> impl std::future::Future<Output = ()> + Send;
}

impl<W: WorkerHandle> StepDispatcher for std::sync::Arc<PoolManager<W>> {
    async fn submit(&self, request: StepRequest) {
        PoolManager::submit(self, request).await;
    }

    async fn cancel_step(&self, run_id: Uuid, step_id: &str) {
        PoolManager::cancel_step(self, run_id, step_id).await;
    }

    async fn discard_queued(&self, run_id: Uuid, step_id: &str) {
        PoolManager::discard_queued(self, run_id, step_id).await;
    }
}

/// Commands consumed by a run's controller actor.
#[derive(Debug)]
pub(crate) enum RunCommand {
    /// Begin scheduling the initial ready frontier.
    Start,
    /// A pool callback for this run.
    Pool(crate::pool::PoolEvent),
    /// A step's engine-side deadline fired.
    StepDeadline { step_id: String, attempt: u32 },
    /// Backoff elapsed after a lost worker; resubmit.
    Resubmit { step_id: String, attempt: u32 },
    /// The whole run exceeded its wall-clock ceiling.
    RunDeadline,
    /// User-requested cancellation (idempotent).
    Cancel,
}
