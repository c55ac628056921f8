//! Run repository trait definition.
//!
//! Covers three entity families: runs, per-step execution records, and
//! ordered step logs. Step executions are keyed by `(run_id, step_id)`;
//! log order within a step is the `sequence` number, never wall-clock.

use forgeflow_types::error::RepositoryError;
use forgeflow_types::run::{LogEvent, Run, RunStatus, StepExecution};
use uuid::Uuid;

/// Storage interface for run state.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RunRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a new run record.
    fn create_run(&self, run: &Run) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a run's status and optional error/stop time.
    fn update_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        stopped_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by id.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, RepositoryError>> + Send;

    /// List runs of a plan (by content hash), newest first.
    fn list_runs(
        &self,
        plan_hash: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    /// Upsert a step execution record by `(run_id, step_id)`.
    fn save_step(
        &self,
        step: &StepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get one step execution record.
    fn get_step(
        &self,
        run_id: &Uuid,
        step_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<StepExecution>, RepositoryError>> + Send;

    /// List all step execution records of a run.
    fn list_steps(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Logs
    // -----------------------------------------------------------------------

    /// Append already-ordered log events for a step.
    fn append_logs(
        &self,
        events: &[LogEvent],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List a step's log events ordered by sequence.
    fn list_logs(
        &self,
        run_id: &Uuid,
        step_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<LogEvent>, RepositoryError>> + Send;
}

impl<R: RunRepository> RunRepository for std::sync::Arc<R> {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        (**self).create_run(run).await
    }

    async fn update_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        stopped_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), RepositoryError> {
        (**self).update_run(run_id, status, error, stopped_at).await
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        (**self).get_run(run_id).await
    }

    async fn list_runs(&self, plan_hash: &str, limit: u32) -> Result<Vec<Run>, RepositoryError> {
        (**self).list_runs(plan_hash, limit).await
    }

    async fn save_step(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        (**self).save_step(step).await
    }

    async fn get_step(&self, run_id: &Uuid, step_id: &str) -> Result<Option<StepExecution>, RepositoryError> {
        (**self).get_step(run_id, step_id).await
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
        (**self).list_steps(run_id).await
    }

    async fn append_logs(&self, events: &[LogEvent]) -> Result<(), RepositoryError> {
        (**self).append_logs(events).await
    }

    async fn list_logs(&self, run_id: &Uuid, step_id: &str) -> Result<Vec<LogEvent>, RepositoryError> {
        (**self).list_logs(run_id, step_id).await
    }
}
