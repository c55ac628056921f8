//! The engine facade: run admission, event publication, pool routing.

use std::sync::Arc;

use dashmap::DashMap;
use forgeflow_types::config::EngineConfig;
use forgeflow_types::error::{RepositoryError, ValidationError};
use forgeflow_types::event::RunEvent;
use forgeflow_types::plan::Plan;
use forgeflow_types::run::{Run, RunStatus};
use forgeflow_types::schema::SchemaViolation;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::run::RunController;
use super::{RunCommand, StepDispatcher};
use crate::event::EventBus;
use crate::graph;
use crate::pool::PoolEvent;
use crate::repository::RunRepository;

/// Why a run was not admitted.
#[derive(Debug, thiserror::Error)]
pub enum StartRunError {
    #[error("run inputs rejected: {0}")]
    InvalidInputs(SchemaViolation),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Admits runs, spawns their controllers, and routes pool callbacks to
/// them. The engine is the sole publisher on its event bus; publishing
/// never blocks on slow subscribers.
pub struct ExecutionEngine<R, D> {
    config: EngineConfig,
    repo: R,
    dispatcher: D,
    bus: EventBus,
    controllers: DashMap<Uuid, mpsc::UnboundedSender<RunCommand>>,
}

impl<R, D> ExecutionEngine<R, D>
where
    R: RunRepository + Clone + 'static,
    D: StepDispatcher + Clone,
{
    /// Create the engine and spawn its pool-event router. The router stops
    /// when `shutdown` is cancelled or the pool side hangs up.
    pub fn spawn(
        config: EngineConfig,
        repo: R,
        dispatcher: D,
        pool_rx: mpsc::UnboundedReceiver<PoolEvent>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let bus = EventBus::new(config.event_capacity);
        let engine = Arc::new(Self {
            config,
            repo,
            dispatcher,
            bus,
            controllers: DashMap::new(),
        });
        tokio::spawn(Self::route_pool_events(Arc::clone(&engine), pool_rx, shutdown));
        engine
    }

    /// Subscribe to run lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    /// Admit and start a run of `plan` with the given inputs.
    ///
    /// Inputs are checked against the plan's input schema before anything
    /// is persisted; a violation rejects the run without a record.
    pub async fn start_run(self: &Arc<Self>, plan: Plan, inputs: Value) -> Result<Uuid, StartRunError> {
        if let Some(schema) = &plan.input_schema {
            schema.validate(&inputs).map_err(StartRunError::InvalidInputs)?;
        }
        // Plans are validated at registration; re-deriving the index here
        // also guards runs started from hand-built plans.
        let index = graph::validate(&plan.steps)?;

        let run = Run {
            id: Uuid::now_v7(),
            plan_hash: plan.content_hash.clone(),
            inputs,
            status: RunStatus::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            stopped_at: None,
            error: None,
        };
        self.repo.create_run(&run).await?;
        info!(run_id = %run.id, plan = %plan.name, "run admitted");

        let (tx, join) = RunController::spawn(
            run.id,
            plan,
            index,
            self.config.clone(),
            self.repo.clone(),
            self.dispatcher.clone(),
            self.bus.clone(),
        );
        let _ = tx.send(RunCommand::Start);
        self.controllers.insert(run.id, tx);

        // Drop the routing entry once the controller finishes
        let engine = Arc::clone(self);
        let run_id = run.id;
        tokio::spawn(async move {
            let _ = join.await;
            engine.controllers.remove(&run_id);
        });

        Ok(run.id)
    }

    /// Request cancellation of a run. Idempotent; returns `false` when the
    /// run is unknown or already finished.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.controllers.get(&run_id) {
            Some(tx) => tx.send(RunCommand::Cancel).is_ok(),
            None => false,
        }
    }

    async fn route_pool_events(
        engine: Arc<Self>,
        mut pool_rx: mpsc::UnboundedReceiver<PoolEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = pool_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let run_id = event.run_id();
            match engine.controllers.get(&run_id) {
                Some(tx) => {
                    let _ = tx.send(RunCommand::Pool(event));
                }
                None => debug!(%run_id, "pool event for unknown or finished run dropped"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl;
    use crate::pool::StepRequest;
    use crate::repository::InMemoryRunRepository;
    use forgeflow_types::run::{
        LogEvent, LogStream, StepExecutionStatus, StepOutcome, StepResult,
    };
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    // -----------------------------------------------------------------------
    // Harness
    // -----------------------------------------------------------------------

    /// Captures submissions; the test plays the worker by feeding pool
    /// events back through the engine's channel.
    #[derive(Clone, Default)]
    struct StubDispatcher {
        submitted: Arc<StdMutex<Vec<StepRequest>>>,
        cancelled: Arc<StdMutex<Vec<(Uuid, String)>>>,
        discarded: Arc<StdMutex<Vec<(Uuid, String)>>>,
    }

    impl StepDispatcher for StubDispatcher {
        async fn submit(&self, request: StepRequest) {
            self.submitted.lock().unwrap().push(request);
        }

        async fn cancel_step(&self, run_id: Uuid, step_id: &str) {
            self.cancelled.lock().unwrap().push((run_id, step_id.to_string()));
        }

        async fn discard_queued(&self, run_id: Uuid, step_id: &str) {
            self.discarded.lock().unwrap().push((run_id, step_id.to_string()));
        }
    }

    impl StubDispatcher {
        fn submissions(&self) -> Vec<(String, u32)> {
            self.submitted
                .lock()
                .unwrap()
                .iter()
                .map(|r| (r.step.id.clone(), r.attempt))
                .collect()
        }
    }

    struct Harness {
        engine: Arc<ExecutionEngine<Arc<InMemoryRunRepository>, StubDispatcher>>,
        repo: Arc<InMemoryRunRepository>,
        dispatcher: StubDispatcher,
        pool_tx: mpsc::UnboundedSender<PoolEvent>,
        events: broadcast::Receiver<RunEvent>,
    }

    fn harness_with(config: EngineConfig) -> Harness {
        let repo = Arc::new(InMemoryRunRepository::new());
        let dispatcher = StubDispatcher::default();
        let (pool_tx, pool_rx) = mpsc::unbounded_channel();
        let engine = ExecutionEngine::spawn(
            config,
            Arc::clone(&repo),
            dispatcher.clone(),
            pool_rx,
            CancellationToken::new(),
        );
        let events = engine.events();
        Harness {
            engine,
            repo,
            dispatcher,
            pool_tx,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(EngineConfig::default())
    }

    fn plan_from(source: &str) -> Plan {
        let mut plans =
            dsl::evaluate_source("acme/widgets", "ci/main.flow", source).expect("plan evaluates");
        plans.remove(0)
    }

    impl Harness {
        /// Wait until `step_id` has been submitted with `attempt`.
        async fn submission(&self, step_id: &str, attempt: u32) -> StepRequest {
            for _ in 0..2000 {
                let found = self
                    .dispatcher
                    .submitted
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|r| r.step.id == step_id && r.attempt == attempt)
                    .cloned();
                if let Some(request) = found {
                    return request;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            panic!("step '{step_id}' attempt {attempt} was never submitted");
        }

        fn start_step(&self, run_id: Uuid, step_id: &str, attempt: u32) {
            self.pool_tx
                .send(PoolEvent::StepStarted {
                    run_id,
                    step_id: step_id.to_string(),
                    attempt,
                    worker_id: "w-1".to_string(),
                })
                .unwrap();
        }

        fn finish_step(&self, run_id: Uuid, step_id: &str, attempt: u32, result: StepResult) {
            self.pool_tx
                .send(PoolEvent::StepCompleted {
                    run_id,
                    step_id: step_id.to_string(),
                    attempt,
                    result,
                })
                .unwrap();
        }

        /// Play a worker that starts and succeeds the step.
        async fn run_step_ok(&self, run_id: Uuid, step_id: &str) {
            self.submission(step_id, 1).await;
            self.start_step(run_id, step_id, 1);
            self.finish_step(run_id, step_id, 1, success(None));
        }

        async fn terminal_event(&mut self) -> RunEvent {
            loop {
                let event = tokio::time::timeout(Duration::from_secs(10), self.events.recv())
                    .await
                    .expect("timed out waiting for run terminal event")
                    .expect("event bus closed");
                if event.is_run_terminal() {
                    return event;
                }
            }
        }

        async fn step_status(&self, run_id: Uuid, step_id: &str) -> StepExecutionStatus {
            self.repo
                .get_step(&run_id, step_id)
                .await
                .unwrap()
                .expect("step record exists")
                .status
        }
    }

    fn success(output: Option<Value>) -> StepResult {
        StepResult {
            outcome: StepOutcome::Success,
            exit_code: Some(0),
            output,
            message: None,
        }
    }

    fn failure(message: &str) -> StepResult {
        StepResult {
            outcome: StepOutcome::Failure,
            exit_code: Some(1),
            output: None,
            message: Some(message.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Happy path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn linear_run_succeeds() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "build" {
  step("checkout", "shell", { command: "git checkout" })
  step("compile", "shell", { command: "make" }, ["checkout"])
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.run_step_ok(run_id, "checkout").await;
        h.run_step_ok(run_id, "compile").await;

        assert!(matches!(h.terminal_event().await, RunEvent::RunCompleted { .. }));
        let run = h.repo.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.stopped_at.is_some());
    }

    #[tokio::test]
    async fn independent_steps_submitted_together() {
        let h = harness();
        let plan = plan_from(
            r#"
workflow "fan" {
  step("a", "shell", { command: "true" })
  step("b", "shell", { command: "true" })
}
"#,
        );
        h.engine.start_run(plan, serde_json::json!({})).await.unwrap();
        h.submission("a", 1).await;
        h.submission("b", 1).await;
    }

    // -----------------------------------------------------------------------
    // Input admission
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn invalid_inputs_rejected_before_admission() {
        let h = harness();
        let plan = plan_from(
            r#"
workflow "build" {
  inputs({ target: string() })
  step("a", "shell", { command: "true" })
}
"#,
        );
        let plan_hash = plan.content_hash.clone();
        let err = h
            .engine
            .start_run(plan, serde_json::json!({ "target": 42 }))
            .await
            .unwrap_err();
        assert!(matches!(err, StartRunError::InvalidInputs(_)));
        // Nothing was persisted
        assert!(h.repo.list_runs(&plan_hash, 10).await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Skip propagation (diamond)
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn diamond_failure_skips_downstream_but_not_siblings() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "diamond" {
  step("a", "shell", { command: "true" })
  step("b", "shell", { command: "false" }, ["a"])
  step("c", "shell", { command: "true" }, ["a"])
  step("d", "shell", { command: "true" }, ["b", "c"])
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.run_step_ok(run_id, "a").await;

        // b fails, c succeeds
        h.submission("b", 1).await;
        h.start_step(run_id, "b", 1);
        h.finish_step(run_id, "b", 1, failure("exit status 1"));
        h.run_step_ok(run_id, "c").await;

        match h.terminal_event().await {
            RunEvent::RunFailed { error, .. } => assert!(error.contains("'b'"), "got: {error}"),
            other => panic!("unexpected terminal: {other:?}"),
        }
        assert_eq!(h.step_status(run_id, "b").await, StepExecutionStatus::Failed);
        assert_eq!(h.step_status(run_id, "c").await, StepExecutionStatus::Succeeded);
        assert_eq!(h.step_status(run_id, "d").await, StepExecutionStatus::Skipped);
        // d was never handed to the pool
        assert!(!h.dispatcher.submissions().iter().any(|(id, _)| id == "d"));
    }

    // -----------------------------------------------------------------------
    // Parallel groups
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn group_concurrency_bound_holds() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "wide" {
  step("m1", "shell", { command: "true" })
  step("m2", "shell", { command: "true" })
  step("m3", "shell", { command: "true" })
  step("m4", "shell", { command: "true" })
  step("m5", "shell", { command: "true" })
  parallel("grid", ["m1", "m2", "m3", "m4", "m5"], { max_concurrent: 2 })
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        // Exactly two members dispatched up front
        h.submission("m1", 1).await;
        h.submission("m2", 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.dispatcher.submissions().len(), 2);

        // Completing one member releases exactly one more
        for i in 1..=5u32 {
            let step_id = format!("m{i}");
            h.start_step(run_id, &step_id, 1);
            h.finish_step(run_id, &step_id, 1, success(None));
            if i <= 3 {
                h.submission(&format!("m{}", i + 2), 1).await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            let in_flight = 5.min(i as usize + 2);
            assert!(h.dispatcher.submissions().len() <= in_flight);
        }

        assert!(matches!(h.terminal_event().await, RunEvent::RunCompleted { .. }));
        assert_eq!(h.step_status(run_id, "grid").await, StepExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn group_fails_only_after_all_members_terminal() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "partial" {
  step("m1", "shell", { command: "false" })
  step("m2", "shell", { command: "true" })
  parallel("pair", ["m1", "m2"], { max_concurrent: 2 })
  step("after", "shell", { command: "true" }, ["pair"])
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("m1", 1).await;
        h.start_step(run_id, "m1", 1);
        h.finish_step(run_id, "m1", 1, failure("exit status 1"));

        // Group is not terminal yet; m2 still runs to completion
        h.run_step_ok(run_id, "m2").await;

        assert!(matches!(h.terminal_event().await, RunEvent::RunFailed { .. }));
        assert_eq!(h.step_status(run_id, "m2").await, StepExecutionStatus::Succeeded);
        assert_eq!(h.step_status(run_id, "pair").await, StepExecutionStatus::Failed);
        assert_eq!(h.step_status(run_id, "after").await, StepExecutionStatus::Skipped);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancel_stops_running_and_pending_steps() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "long" {
  step("running", "shell", { command: "sleep 600" })
  step("pending", "shell", { command: "true" }, ["running"])
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("running", 1).await;
        h.start_step(run_id, "running", 1);
        // Let the start land before cancelling
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(h.engine.cancel(run_id));
        assert!(matches!(h.terminal_event().await, RunEvent::RunCancelled { .. }));

        // The worker was told to stop
        assert!(h
            .dispatcher
            .cancelled
            .lock()
            .unwrap()
            .contains(&(run_id, "running".to_string())));
        assert_eq!(h.step_status(run_id, "running").await, StepExecutionStatus::Cancelled);
        assert_eq!(h.step_status(run_id, "pending").await, StepExecutionStatus::Cancelled);

        // The dependent is cancelled (not skipped), with the cancel reason
        let pending = h.repo.get_step(&run_id, "pending").await.unwrap().unwrap();
        assert_eq!(pending.error.as_deref(), Some("run cancelled"));

        let run = h.repo.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);

        // Idempotent: the controller is gone, nothing breaks
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!h.engine.cancel(run_id));
        // A late worker report is dropped without effect
        h.finish_step(run_id, "running", 1, success(None));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.step_status(run_id, "running").await, StepExecutionStatus::Cancelled);
    }

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn step_deadline_times_out_hanging_worker() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "hang" {
  step("stuck", "shell", { command: "sleep 999", timeout_secs: 5 })
  step("next", "shell", { command: "true" }, ["stuck"])
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("stuck", 1).await;
        h.start_step(run_id, "stuck", 1);
        // No report ever arrives; the engine-side deadline fires

        match h.terminal_event().await {
            RunEvent::RunFailed { error, .. } => {
                assert!(error.contains("timed out"), "got: {error}")
            }
            other => panic!("unexpected terminal: {other:?}"),
        }
        assert_eq!(h.step_status(run_id, "stuck").await, StepExecutionStatus::TimedOut);
        assert_eq!(h.step_status(run_id, "next").await, StepExecutionStatus::Skipped);
        assert!(h
            .dispatcher
            .cancelled
            .lock()
            .unwrap()
            .contains(&(run_id, "stuck".to_string())));
    }

    // -----------------------------------------------------------------------
    // Lost workers
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn lost_worker_requeues_with_backoff_then_succeeds() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "flaky" {
  step("only", "shell", { command: "true" })
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("only", 1).await;
        h.start_step(run_id, "only", 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.pool_tx
            .send(PoolEvent::StepLost {
                run_id,
                step_id: "only".to_string(),
                attempt: 1,
                worker_id: "w-1".to_string(),
            })
            .unwrap();

        // Resubmitted as attempt 2 after the backoff
        h.submission("only", 2).await;
        h.start_step(run_id, "only", 2);
        h.finish_step(run_id, "only", 2, success(None));

        assert!(matches!(h.terminal_event().await, RunEvent::RunCompleted { .. }));
        let step = h.repo.get_step(&run_id, "only").await.unwrap().unwrap();
        assert_eq!(step.attempt, 2);
    }

    #[tokio::test]
    async fn lost_worker_fails_step_after_attempt_cap() {
        let mut h = harness_with(EngineConfig {
            max_infra_attempts: 1,
            ..Default::default()
        });
        let plan = plan_from(
            r#"
workflow "doomed" {
  step("only", "shell", { command: "true" })
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("only", 1).await;
        h.start_step(run_id, "only", 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.pool_tx
            .send(PoolEvent::StepLost {
                run_id,
                step_id: "only".to_string(),
                attempt: 1,
                worker_id: "w-1".to_string(),
            })
            .unwrap();

        match h.terminal_event().await {
            RunEvent::RunFailed { error, .. } => {
                assert!(error.contains("worker"), "got: {error}")
            }
            other => panic!("unexpected terminal: {other:?}"),
        }
        assert_eq!(h.step_status(run_id, "only").await, StepExecutionStatus::Failed);
    }

    // -----------------------------------------------------------------------
    // Idempotent reports
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn duplicate_completion_reports_are_ignored() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "once" {
  step("only", "shell", { command: "true" })
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("only", 1).await;
        h.start_step(run_id, "only", 1);
        h.finish_step(run_id, "only", 1, success(None));
        // Redelivery of the same report, and a contradictory late one
        h.finish_step(run_id, "only", 1, success(None));
        h.finish_step(run_id, "only", 1, failure("late contradictory report"));

        let mut completions = 0;
        loop {
            let event = h.events.recv().await.unwrap();
            if matches!(event, RunEvent::StepCompleted { .. }) {
                completions += 1;
            }
            if event.is_run_terminal() {
                assert!(matches!(event, RunEvent::RunCompleted { .. }));
                break;
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(h.step_status(run_id, "only").await, StepExecutionStatus::Succeeded);
    }

    // -----------------------------------------------------------------------
    // Output validation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn step_output_schema_violation_fails_the_step() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "typed" {
  step("emit", "shell", {
    command: "emit",
    output_schema: object({ count: integer() }),
  })
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("emit", 1).await;
        h.start_step(run_id, "emit", 1);
        h.finish_step(
            run_id,
            "emit",
            1,
            success(Some(serde_json::json!({ "count": "not a number" }))),
        );

        match h.terminal_event().await {
            RunEvent::RunFailed { error, .. } => {
                assert!(error.contains("output rejected"), "got: {error}")
            }
            other => panic!("unexpected terminal: {other:?}"),
        }
        assert_eq!(h.step_status(run_id, "emit").await, StepExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn run_output_schema_checked_over_aggregate_outputs() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "aggregate" {
  outputs({ emit: object({ version: string() }) })
  step("emit", "shell", { command: "emit" })
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("emit", 1).await;
        h.start_step(run_id, "emit", 1);
        h.finish_step(run_id, "emit", 1, success(Some(serde_json::json!({ "version": 3 }))));

        match h.terminal_event().await {
            RunEvent::RunFailed { error, .. } => {
                assert!(error.contains("outputs rejected"), "got: {error}")
            }
            other => panic!("unexpected terminal: {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Log ordering
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn logs_surface_in_sequence_order_despite_arrival_order() {
        let mut h = harness();
        let plan = plan_from(
            r#"
workflow "noisy" {
  step("chatty", "shell", { command: "build" })
}
"#,
        );
        let run_id = h.engine.start_run(plan, serde_json::json!({})).await.unwrap();

        h.submission("chatty", 1).await;
        h.start_step(run_id, "chatty", 1);

        let log = |sequence: u64| {
            PoolEvent::StepLog(LogEvent {
                run_id,
                step_id: "chatty".to_string(),
                sequence,
                stream: LogStream::Stdout,
                line: format!("line {sequence}"),
            })
        };
        // Arrive out of order
        h.pool_tx.send(log(1)).unwrap();
        h.pool_tx.send(log(0)).unwrap();
        h.pool_tx.send(log(2)).unwrap();
        h.finish_step(run_id, "chatty", 1, success(None));

        let mut observed = Vec::new();
        loop {
            let event = h.events.recv().await.unwrap();
            if let RunEvent::StepLog { event } = &event {
                observed.push(event.sequence);
            }
            if event.is_run_terminal() {
                break;
            }
        }
        assert_eq!(observed, vec![0, 1, 2]);

        let stored = h.repo.list_logs(&run_id, "chatty").await.unwrap();
        let sequences: Vec<u64> = stored.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }
}
