//! Per-run controller actor.
//!
//! One task owns all mutable state for a run: step statuses, in-degree
//! counters, group slots, the log reorder buffer, and the lazily created
//! execution records. Everything reaches it through the command channel, so
//! transitions within the run are serialized without locks. Deadlines and
//! backoffs are detached timer tasks that send commands back into the loop;
//! a timer whose step already moved on is ignored by attempt matching.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::Utc;
use forgeflow_types::config::EngineConfig;
use forgeflow_types::error::{ExecutionError, InfrastructureError};
use forgeflow_types::event::RunEvent;
use forgeflow_types::plan::{Plan, StepConfig, StepKind};
use forgeflow_types::run::{LogEvent, RunStatus, StepExecution, StepExecutionStatus, StepOutcome, StepResult};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::logs::LogReorderBuffer;
use super::{state, RunCommand, StepDispatcher};
use crate::event::EventBus;
use crate::graph::GraphIndex;
use crate::pool::{PoolEvent, StepRequest};
use crate::repository::RunRepository;

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct GroupState {
    members: Vec<String>,
    max_concurrent: usize,
    running: usize,
    /// Ready members waiting for a group slot, FIFO.
    waiting: VecDeque<String>,
}

pub(super) struct RunController<R, D> {
    run_id: Uuid,
    plan: Plan,
    config: EngineConfig,
    repo: R,
    dispatcher: D,
    bus: EventBus,
    index: GraphIndex,

    statuses: HashMap<String, StepExecutionStatus>,
    indegree: HashMap<String, usize>,
    executions: HashMap<String, StepExecution>,
    groups: HashMap<String, GroupState>,
    /// Members currently holding a group slot.
    slot_holders: HashSet<String>,

    outputs: serde_json::Map<String, Value>,
    logs: LogReorderBuffer,

    cancel_requested: bool,
    run_failure: Option<String>,
    finished: bool,
    started_at: chrono::DateTime<Utc>,

    cmd_tx: mpsc::UnboundedSender<RunCommand>,
}

impl<R, D> RunController<R, D>
where
    R: RunRepository + 'static,
    D: StepDispatcher,
{
    /// Spawn the controller task. The returned sender feeds its command
    /// loop; the join handle resolves when the run reaches a terminal state.
    pub(super) fn spawn(
        run_id: Uuid,
        plan: Plan,
        index: GraphIndex,
        config: EngineConfig,
        repo: R,
        dispatcher: D,
        bus: EventBus,
    ) -> (mpsc::UnboundedSender<RunCommand>, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let statuses = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepExecutionStatus::Pending))
            .collect();
        let groups = plan
            .steps
            .iter()
            .filter_map(|s| match &s.config {
                StepConfig::ParallelGroup { members, max_concurrent } => Some((
                    s.id.clone(),
                    GroupState {
                        members: members.clone(),
                        max_concurrent: max_concurrent.unwrap_or(config.default_group_concurrency)
                            as usize,
                        running: 0,
                        waiting: VecDeque::new(),
                    },
                )),
                _ => None,
            })
            .collect();

        let controller = Self {
            run_id,
            indegree: index.indegree.clone(),
            index,
            config,
            repo,
            dispatcher,
            bus,
            statuses,
            executions: HashMap::new(),
            groups,
            slot_holders: HashSet::new(),
            outputs: serde_json::Map::new(),
            logs: LogReorderBuffer::new(),
            cancel_requested: false,
            run_failure: None,
            finished: false,
            started_at: Utc::now(),
            cmd_tx: cmd_tx.clone(),
            plan,
        };
        let handle = tokio::spawn(controller.run_loop(cmd_rx));
        (cmd_tx, handle)
    }

    async fn run_loop(mut self, mut cmd_rx: mpsc::UnboundedReceiver<RunCommand>) {
        while let Some(command) = cmd_rx.recv().await {
            match command {
                RunCommand::Start => self.on_start().await,
                RunCommand::Pool(event) => self.on_pool_event(event).await,
                RunCommand::StepDeadline { step_id, attempt } => {
                    self.on_step_deadline(step_id, attempt).await
                }
                RunCommand::Resubmit { step_id, attempt } => {
                    self.on_resubmit(step_id, attempt).await
                }
                RunCommand::RunDeadline => {
                    let timeout = self.config.default_run_timeout_secs;
                    self.cancel_all(Some(format!("run exceeded {timeout}s wall-clock limit")))
                        .await;
                }
                RunCommand::Cancel => self.cancel_all(None).await,
            }
            if self.finished {
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Command handlers
    // -----------------------------------------------------------------------

    async fn on_start(&mut self) {
        self.started_at = Utc::now();
        if let Err(error) = self
            .repo
            .update_run(&self.run_id, RunStatus::Running, None, None)
            .await
        {
            warn!(run_id = %self.run_id, %error, "failed to persist run start");
        }
        self.bus.publish(RunEvent::RunStarted {
            run_id: self.run_id,
            plan_hash: self.plan.content_hash.clone(),
            plan_name: self.plan.name.clone(),
        });
        info!(run_id = %self.run_id, plan = %self.plan.name, "run started");

        // Run-level wall-clock ceiling
        let tx = self.cmd_tx.clone();
        let run_timeout = self.config.default_run_timeout_secs;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(run_timeout)).await;
            let _ = tx.send(RunCommand::RunDeadline);
        });

        let roots: Vec<String> = self.index.roots().into_iter().map(String::from).collect();
        self.schedule_ready(roots).await;
        self.maybe_finish().await;
    }

    async fn on_pool_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::StepStarted { step_id, attempt, worker_id, .. } => {
                self.on_step_started(step_id, attempt, worker_id).await;
            }
            PoolEvent::StepLog(event) => self.on_log(event).await,
            PoolEvent::StepCompleted { step_id, attempt, result, .. } => {
                self.on_completed(step_id, attempt, result).await;
            }
            PoolEvent::StepLost { step_id, attempt, worker_id, .. } => {
                self.on_worker_lost(step_id, attempt, worker_id).await;
            }
            PoolEvent::StepUnassignable { step_id, attempt, requires, .. } => {
                let current = self.status(&step_id);
                if !current.is_terminal() && self.attempt_of(&step_id) == attempt {
                    let error = InfrastructureError::NoMatchingWorker { requires }.to_string();
                    self.finalize(step_id, StepExecutionStatus::Failed, Some(error), None, None)
                        .await;
                }
            }
        }
    }

    async fn on_step_started(&mut self, step_id: String, attempt: u32, worker_id: String) {
        if self.cancel_requested {
            self.dispatcher.cancel_step(self.run_id, &step_id).await;
            return;
        }
        if self.status(&step_id) != StepExecutionStatus::Ready || self.attempt_of(&step_id) != attempt
        {
            return;
        }
        let timeout_secs = self
            .plan
            .step(&step_id)
            .and_then(|s| s.timeout_secs)
            .unwrap_or(self.config.default_step_timeout_secs);

        if let Some(exec) = self.executions.get_mut(&step_id) {
            exec.status = StepExecutionStatus::Running;
            exec.assigned_worker = Some(worker_id.clone());
            exec.started_at = Some(Utc::now());
            let snapshot = exec.clone();
            self.persist_step(&snapshot).await;
        }
        self.statuses.insert(step_id.clone(), StepExecutionStatus::Running);
        self.bus.publish(RunEvent::StepStarted {
            run_id: self.run_id,
            step_id: step_id.clone(),
            worker_id,
            attempt,
        });

        // Engine-enforced deadline: fires even if the worker hangs
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            let _ = tx.send(RunCommand::StepDeadline { step_id, attempt });
        });
    }

    async fn on_log(&mut self, event: LogEvent) {
        let released = self.logs.push(event);
        self.emit_logs(released).await;
    }

    async fn on_completed(&mut self, step_id: String, attempt: u32, result: StepResult) {
        let current = self.status(&step_id);
        if current.is_terminal() || self.attempt_of(&step_id) != attempt {
            debug!(run_id = %self.run_id, step_id, attempt, "duplicate or stale report ignored");
            return;
        }
        // A fast worker can report before the started callback is processed
        if current == StepExecutionStatus::Ready {
            self.statuses.insert(step_id.clone(), StepExecutionStatus::Running);
        }

        let (status, error) = match result.outcome {
            StepOutcome::Success => {
                let violation = self
                    .plan
                    .step(&step_id)
                    .and_then(|s| s.output_schema.as_ref())
                    .and_then(|schema| {
                        schema
                            .validate(result.output.as_ref().unwrap_or(&Value::Null))
                            .err()
                    });
                match violation {
                    Some(violation) => {
                        let error = ExecutionError::OutputRejected {
                            step_id: step_id.clone(),
                            violation,
                        };
                        (StepExecutionStatus::Failed, Some(error.to_string()))
                    }
                    None => (StepExecutionStatus::Succeeded, None),
                }
            }
            StepOutcome::Failure => {
                let error = ExecutionError::StepFailed {
                    step_id: step_id.clone(),
                    reason: result.message.clone().unwrap_or_else(|| "step failed".to_string()),
                };
                (StepExecutionStatus::Failed, Some(error.to_string()))
            }
            StepOutcome::Cancelled => (StepExecutionStatus::Cancelled, result.message.clone()),
        };
        self.finalize(step_id, status, error, result.exit_code, result.output).await;
    }

    async fn on_worker_lost(&mut self, step_id: String, attempt: u32, worker_id: String) {
        if self.status(&step_id) != StepExecutionStatus::Running || self.attempt_of(&step_id) != attempt
        {
            return;
        }
        if attempt >= self.config.max_infra_attempts {
            let error = InfrastructureError::WorkerLost {
                worker_id,
                step_id: step_id.clone(),
            };
            self.finalize(step_id, StepExecutionStatus::Failed, Some(error.to_string()), None, None)
                .await;
            return;
        }

        // Re-queue with a bumped attempt after backoff
        let next_attempt = attempt + 1;
        if let Some(exec) = self.executions.get_mut(&step_id) {
            exec.status = StepExecutionStatus::Ready;
            exec.assigned_worker = None;
            exec.attempt = next_attempt;
            let snapshot = exec.clone();
            self.persist_step(&snapshot).await;
        }
        self.statuses.insert(step_id.clone(), StepExecutionStatus::Ready);
        let backoff = self.config.infra_backoff_secs(next_attempt - 1);
        warn!(
            run_id = %self.run_id,
            step_id,
            worker_id,
            next_attempt,
            backoff_secs = backoff,
            "worker lost, re-queueing step"
        );
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            let _ = tx.send(RunCommand::Resubmit {
                step_id,
                attempt: next_attempt,
            });
        });
    }

    async fn on_resubmit(&mut self, step_id: String, attempt: u32) {
        if self.cancel_requested
            || self.status(&step_id) != StepExecutionStatus::Ready
            || self.attempt_of(&step_id) != attempt
        {
            return;
        }
        self.submit(&step_id).await;
    }

    async fn on_step_deadline(&mut self, step_id: String, attempt: u32) {
        if self.status(&step_id) != StepExecutionStatus::Running || self.attempt_of(&step_id) != attempt
        {
            return;
        }
        let timeout_secs = self
            .plan
            .step(&step_id)
            .and_then(|s| s.timeout_secs)
            .unwrap_or(self.config.default_step_timeout_secs);
        // Ask the worker to stop, but do not wait for it
        self.dispatcher.cancel_step(self.run_id, &step_id).await;
        let error = ExecutionError::StepTimedOut {
            step_id: step_id.clone(),
            timeout_secs,
        };
        self.finalize(step_id, StepExecutionStatus::TimedOut, Some(error.to_string()), None, None)
            .await;
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Move pending steps whose in-degree reached zero into `ready`, create
    /// their execution records, and dispatch them (or park them on a full
    /// group). Processes transitively released group members via worklist.
    async fn schedule_ready(&mut self, seeds: Vec<String>) {
        let mut work: VecDeque<String> = seeds.into();
        while let Some(step_id) = work.pop_front() {
            if self.status(&step_id) != StepExecutionStatus::Pending {
                continue;
            }
            let record = StepExecution {
                id: Uuid::now_v7(),
                run_id: self.run_id,
                step_id: step_id.clone(),
                status: StepExecutionStatus::Ready,
                assigned_worker: None,
                attempt: 1,
                started_at: None,
                stopped_at: None,
                exit_code: None,
                output: None,
                error: None,
            };
            self.persist_step(&record).await;
            self.executions.insert(step_id.clone(), record);
            self.statuses.insert(step_id.clone(), StepExecutionStatus::Ready);

            let kind = self.plan.step(&step_id).map(|s| s.kind);
            if kind == Some(StepKind::ParallelGroup) {
                // Groups run on no worker; entering `running` releases the
                // members' implicit group in-edge.
                self.statuses.insert(step_id.clone(), StepExecutionStatus::Running);
                if let Some(exec) = self.executions.get_mut(&step_id) {
                    exec.status = StepExecutionStatus::Running;
                    exec.started_at = Some(Utc::now());
                    let snapshot = exec.clone();
                    self.persist_step(&snapshot).await;
                }
                let members = self
                    .groups
                    .get(&step_id)
                    .map(|g| g.members.clone())
                    .unwrap_or_default();
                for member in members {
                    let counter = self.indegree.entry(member.clone()).or_default();
                    *counter = counter.saturating_sub(1);
                    if *counter == 0 {
                        work.push_back(member);
                    }
                }
                continue;
            }

            match self.index.group_of.get(&step_id).cloned() {
                Some(group_id) => {
                    let has_slot = self
                        .groups
                        .get(&group_id)
                        .is_some_and(|g| g.running < g.max_concurrent);
                    if has_slot {
                        self.take_slot(&group_id, &step_id);
                        self.submit(&step_id).await;
                    } else if let Some(group) = self.groups.get_mut(&group_id) {
                        // Waits ready, not pending, for a group slot
                        group.waiting.push_back(step_id);
                    }
                }
                None => self.submit(&step_id).await,
            }
        }
    }

    fn take_slot(&mut self, group_id: &str, step_id: &str) {
        if let Some(group) = self.groups.get_mut(group_id) {
            group.running += 1;
        }
        self.slot_holders.insert(step_id.to_string());
    }

    async fn submit(&mut self, step_id: &str) {
        let Some(step) = self.plan.step(step_id).cloned() else {
            return;
        };
        let Some(exec) = self.executions.get(step_id) else {
            return;
        };
        self.dispatcher
            .submit(StepRequest {
                run_id: self.run_id,
                step_execution_id: exec.id,
                step,
                attempt: exec.attempt,
            })
            .await;
    }

    // -----------------------------------------------------------------------
    // Terminal transitions
    // -----------------------------------------------------------------------

    /// Apply a terminal status to one step and process every consequence:
    /// dependent releases, transitive skips, group slot turnover and group
    /// completion. Worklist-driven; also checks run completion at the end.
    async fn finalize(
        &mut self,
        step_id: String,
        status: StepExecutionStatus,
        error: Option<String>,
        exit_code: Option<i32>,
        output: Option<Value>,
    ) {
        let mut work: VecDeque<(String, StepExecutionStatus, Option<String>, Option<i32>, Option<Value>)> =
            VecDeque::new();
        work.push_back((step_id, status, error, exit_code, output));

        while let Some((id, status, error, exit_code, output)) = work.pop_front() {
            let current = self.status(&id);
            if current.is_terminal() || !state::is_legal(current, status) {
                continue;
            }

            // Record; skipped steps may never have become ready, so the
            // record is created here with attempt 0 (never attempted)
            let exec = self.executions.entry(id.clone()).or_insert_with(|| StepExecution {
                id: Uuid::now_v7(),
                run_id: self.run_id,
                step_id: id.clone(),
                status,
                assigned_worker: None,
                attempt: 0,
                started_at: None,
                stopped_at: None,
                exit_code: None,
                output: None,
                error: None,
            });
            exec.status = status;
            exec.stopped_at = Some(Utc::now());
            exec.error = error.clone();
            if exit_code.is_some() {
                exec.exit_code = exit_code;
            }
            if output.is_some() {
                exec.output = output.clone();
            }
            let snapshot = exec.clone();
            self.statuses.insert(id.clone(), status);
            self.persist_step(&snapshot).await;

            // No more logs can arrive for this step
            let parked = self.logs.flush(self.run_id, &id);
            self.emit_logs(parked).await;

            info!(run_id = %self.run_id, step_id = %id, ?status, "step finished");
            self.bus.publish(RunEvent::StepCompleted {
                run_id: self.run_id,
                step_id: id.clone(),
                status,
                error: error.clone(),
            });

            if status == StepExecutionStatus::Succeeded {
                if let Some(value) = output {
                    self.outputs.insert(id.clone(), value);
                }
            }

            // Group slot turnover and completion
            if let Some(group_id) = self.index.group_of.get(&id).cloned() {
                if self.slot_holders.remove(&id) {
                    if let Some(group) = self.groups.get_mut(&group_id) {
                        group.running = group.running.saturating_sub(1);
                    }
                }
                let mut to_dispatch = Vec::new();
                if !self.cancel_requested {
                    while let Some(group) = self.groups.get_mut(&group_id) {
                        if group.running >= group.max_concurrent {
                            break;
                        }
                        match group.waiting.pop_front() {
                            Some(next) if !self.statuses[&next].is_terminal() => {
                                group.running += 1;
                                self.slot_holders.insert(next.clone());
                                to_dispatch.push(next);
                            }
                            Some(_) => continue,
                            None => break,
                        }
                    }
                }
                for next in to_dispatch {
                    self.submit(&next).await;
                }

                if let Some(group) = self.groups.get(&group_id) {
                    let all_terminal =
                        group.members.iter().all(|m| self.statuses[m].is_terminal());
                    if all_terminal && !self.statuses[&group_id].is_terminal() {
                        let failed_member = group
                            .members
                            .iter()
                            .find(|m| self.statuses[*m] != StepExecutionStatus::Succeeded);
                        let (group_status, group_error) = match failed_member {
                            None => (StepExecutionStatus::Succeeded, None),
                            Some(member) if self.cancel_requested => (
                                StepExecutionStatus::Cancelled,
                                Some(format!("member '{member}' did not complete")),
                            ),
                            Some(member) => (
                                StepExecutionStatus::Failed,
                                Some(format!(
                                    "member '{member}' finished {:?}",
                                    self.statuses[member]
                                )),
                            ),
                        };
                        work.push_back((group_id, group_status, group_error, None, None));
                    }
                }
            }

            // Dependent releases or transitive skips
            let dependents = self.index.dependents.get(&id).cloned().unwrap_or_default();
            if status == StepExecutionStatus::Succeeded {
                let mut released = Vec::new();
                for dependent in dependents {
                    let counter = self.indegree.entry(dependent.clone()).or_default();
                    *counter = counter.saturating_sub(1);
                    if *counter == 0 {
                        released.push(dependent);
                    }
                }
                self.schedule_ready(released).await;
            } else {
                // Under a run-level cancel, every non-terminal step becomes
                // cancelled; skipped is reserved for upstream failures
                let (downstream_status, downstream_error) = if self.cancel_requested {
                    (StepExecutionStatus::Cancelled, "run cancelled".to_string())
                } else {
                    (
                        StepExecutionStatus::Skipped,
                        format!("dependency '{id}' did not succeed"),
                    )
                };
                for dependent in dependents {
                    if self.statuses[&dependent].is_terminal() {
                        continue;
                    }
                    if self.statuses[&dependent] == StepExecutionStatus::Ready {
                        self.dispatcher.discard_queued(self.run_id, &dependent).await;
                    }
                    work.push_back((
                        dependent,
                        downstream_status,
                        Some(downstream_error.clone()),
                        None,
                        None,
                    ));
                }
            }
        }

        self.maybe_finish().await;
    }

    /// Cancel the whole run: running steps get worker-side cancellation,
    /// queued and pending steps flip straight to cancelled. Idempotent.
    async fn cancel_all(&mut self, failure: Option<String>) {
        if self.finished {
            return;
        }
        self.cancel_requested = true;
        if self.run_failure.is_none() {
            self.run_failure = failure;
        }

        let step_ids: Vec<String> = self.plan.steps.iter().map(|s| s.id.clone()).collect();
        for step_id in step_ids {
            match self.status(&step_id) {
                StepExecutionStatus::Running => {
                    self.dispatcher.cancel_step(self.run_id, &step_id).await;
                    self.finalize(
                        step_id,
                        StepExecutionStatus::Cancelled,
                        Some("run cancelled".to_string()),
                        None,
                        None,
                    )
                    .await;
                }
                StepExecutionStatus::Ready => {
                    self.dispatcher.discard_queued(self.run_id, &step_id).await;
                    self.finalize(
                        step_id,
                        StepExecutionStatus::Cancelled,
                        Some("run cancelled".to_string()),
                        None,
                        None,
                    )
                    .await;
                }
                StepExecutionStatus::Pending => {
                    self.finalize(
                        step_id,
                        StepExecutionStatus::Cancelled,
                        Some("run cancelled".to_string()),
                        None,
                        None,
                    )
                    .await;
                }
                _ => {}
            }
        }
        self.maybe_finish().await;
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    async fn maybe_finish(&mut self) {
        if self.finished || !self.statuses.values().all(|s| s.is_terminal()) {
            return;
        }
        self.finished = true;

        let all_succeeded = self
            .statuses
            .values()
            .all(|s| *s == StepExecutionStatus::Succeeded);

        let (status, error) = if let Some(failure) = self.run_failure.take() {
            (RunStatus::Failed, Some(failure))
        } else if self.cancel_requested {
            (RunStatus::Cancelled, None)
        } else if all_succeeded {
            match self.validate_run_outputs() {
                Ok(()) => (RunStatus::Succeeded, None),
                Err(reason) => (RunStatus::Failed, Some(reason)),
            }
        } else {
            (RunStatus::Failed, Some(self.first_failure()))
        };

        if let Err(error) = self
            .repo
            .update_run(&self.run_id, status, error.as_deref(), Some(Utc::now()))
            .await
        {
            warn!(run_id = %self.run_id, %error, "failed to persist run completion");
        }

        let duration_ms = (Utc::now() - self.started_at).num_milliseconds().max(0) as u64;
        info!(run_id = %self.run_id, ?status, duration_ms, "run finished");
        self.bus.publish(match status {
            RunStatus::Succeeded => RunEvent::RunCompleted {
                run_id: self.run_id,
                duration_ms,
            },
            RunStatus::Cancelled => RunEvent::RunCancelled { run_id: self.run_id },
            _ => RunEvent::RunFailed {
                run_id: self.run_id,
                error: error.unwrap_or_else(|| "run failed".to_string()),
            },
        });
    }

    /// The aggregate step-output map checked against the plan's declared
    /// output schema once every step succeeded.
    fn validate_run_outputs(&self) -> Result<(), String> {
        let Some(schema) = &self.plan.output_schema else {
            return Ok(());
        };
        schema
            .validate(&Value::Object(self.outputs.clone()))
            .map_err(|violation| format!("run outputs rejected: {violation}"))
    }

    fn first_failure(&self) -> String {
        for step in &self.plan.steps {
            let status = self.status(&step.id);
            if matches!(status, StepExecutionStatus::Failed | StepExecutionStatus::TimedOut) {
                if let Some(error) = self.executions.get(&step.id).and_then(|e| e.error.clone()) {
                    return error;
                }
                return format!("step '{}' finished {:?}", step.id, status);
            }
        }
        "run failed".to_string()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn status(&self, step_id: &str) -> StepExecutionStatus {
        self.statuses
            .get(step_id)
            .copied()
            .unwrap_or(StepExecutionStatus::Pending)
    }

    fn attempt_of(&self, step_id: &str) -> u32 {
        self.executions.get(step_id).map(|e| e.attempt).unwrap_or(0)
    }

    async fn persist_step(&self, step: &StepExecution) {
        if let Err(error) = self.repo.save_step(step).await {
            warn!(run_id = %self.run_id, step_id = %step.step_id, %error, "failed to persist step");
        }
    }

    async fn emit_logs(&mut self, events: Vec<LogEvent>) {
        if events.is_empty() {
            return;
        }
        if let Err(error) = self.repo.append_logs(&events).await {
            warn!(run_id = %self.run_id, %error, "failed to persist logs");
        }
        for event in events {
            self.bus.publish(RunEvent::StepLog { event });
        }
    }
}
