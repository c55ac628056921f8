//! The pool manager: registration, heartbeats, FIFO assignment, sandboxing.
//!
//! Worker records live behind one async mutex; assignment decisions and the
//! pending queue share it so a worker is never double-booked. The actual
//! `assign` call happens outside the lock against an optimistically-busy
//! worker, reverted on rejection.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forgeflow_types::config::PoolConfig;
use forgeflow_types::run::{LogEvent, StepResult};
use forgeflow_types::worker::{SandboxSpec, WorkerId, WorkerInfo, WorkerStatus};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::worker::{StepAssignment, WorkerHandle, WorkerReporter};
use super::{PoolEvent, StepRequest};

// ---------------------------------------------------------------------------
// Internal messages
// ---------------------------------------------------------------------------

/// What workers send back through their reporters.
#[derive(Debug)]
pub(super) enum WorkerMessage {
    Log(LogEvent),
    Completed {
        worker_id: WorkerId,
        run_id: Uuid,
        step_id: String,
        attempt: u32,
        result: StepResult,
    },
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct InFlight {
    run_id: Uuid,
    step_execution_id: Uuid,
    step_id: String,
    attempt: u32,
}

struct WorkerEntry<W> {
    info: WorkerInfo,
    handle: Arc<W>,
    current: Option<InFlight>,
}

struct PoolState<W> {
    /// Registration order; assignment scans this in order (FIFO ties).
    workers: Vec<WorkerEntry<W>>,
    /// Ready steps waiting for a matching warm worker, in submission order.
    queue: VecDeque<StepRequest>,
}

// ---------------------------------------------------------------------------
// PoolManager
// ---------------------------------------------------------------------------

/// Owns the worker fleet. All workers share one handle type `W`; tests use
/// stub handles, production uses the in-process worker from the infra crate.
pub struct PoolManager<W> {
    config: PoolConfig,
    state: Mutex<PoolState<W>>,
    engine_tx: mpsc::UnboundedSender<PoolEvent>,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl<W: WorkerHandle> PoolManager<W> {
    /// Create the pool and spawn its report loop and heartbeat monitor.
    /// Both stop when `shutdown` is cancelled.
    pub fn spawn(
        config: PoolConfig,
        engine_tx: mpsc::UnboundedSender<PoolEvent>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(Self {
            config,
            state: Mutex::new(PoolState {
                workers: Vec::new(),
                queue: VecDeque::new(),
            }),
            engine_tx,
            worker_tx,
        });

        tokio::spawn(Self::report_loop(Arc::clone(&pool), worker_rx, shutdown.clone()));
        tokio::spawn(Self::monitor_loop(Arc::clone(&pool), shutdown));
        pool
    }

    // -----------------------------------------------------------------------
    // Registration and liveness
    // -----------------------------------------------------------------------

    /// Add a worker as `warm`, immediately eligible for queued work.
    pub async fn register(&self, id: impl Into<WorkerId>, capacity_labels: Vec<String>, handle: W) {
        let id = id.into();
        let now = Utc::now();
        {
            let mut state = self.state.lock().await;
            // Re-registration replaces the previous record
            state.workers.retain(|w| w.info.id != id);
            state.workers.push(WorkerEntry {
                info: WorkerInfo {
                    id: id.clone(),
                    status: WorkerStatus::Warm,
                    capacity_labels,
                    registered_at: now,
                    last_heartbeat_at: now,
                },
                handle: Arc::new(handle),
                current: None,
            });
        }
        info!(worker_id = %id, "worker registered");
        self.drain_queue().await;
    }

    /// Refresh a worker's liveness. An unhealthy worker that heartbeats
    /// again comes back as `warm` (its lost step was already re-queued).
    pub async fn heartbeat(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.workers.iter_mut().find(|w| w.info.id == id) else {
            return false;
        };
        entry.info.last_heartbeat_at = Utc::now();
        if entry.info.status == WorkerStatus::Unhealthy {
            entry.info.status = if entry.current.is_some() {
                WorkerStatus::Busy
            } else {
                WorkerStatus::Warm
            };
        }
        drop(state);
        self.drain_queue().await;
        true
    }

    /// Let a worker finish its current step but assign it nothing new.
    pub async fn drain(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.workers.iter_mut().find(|w| w.info.id == id) {
            entry.info.status = WorkerStatus::Draining;
        }
    }

    /// Snapshot of the current worker records.
    pub async fn workers(&self) -> Vec<WorkerInfo> {
        self.state.lock().await.workers.iter().map(|w| w.info.clone()).collect()
    }

    // -----------------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------------

    /// Submit a ready step. Assigned immediately when a matching warm worker
    /// exists, queued otherwise. Only when no registered worker could ever
    /// satisfy the requirements is the step reported unassignable.
    pub async fn submit(&self, request: StepRequest) {
        self.try_assign(request).await;
    }

    /// Best-effort cancellation of a running step.
    pub async fn cancel_step(&self, run_id: Uuid, step_id: &str) {
        let target = {
            let state = self.state.lock().await;
            state.workers.iter().find_map(|w| {
                w.current
                    .as_ref()
                    .filter(|c| c.run_id == run_id && c.step_id == step_id)
                    .map(|c| (Arc::clone(&w.handle), c.step_execution_id))
            })
        };
        if let Some((handle, step_execution_id)) = target {
            handle.cancel(step_execution_id).await;
        }
    }

    /// Drop a queued request (the engine skipped or cancelled it before a
    /// worker picked it up).
    pub async fn discard_queued(&self, run_id: Uuid, step_id: &str) {
        let mut state = self.state.lock().await;
        state
            .queue
            .retain(|r| !(r.run_id == run_id && r.step.id == step_id));
    }

    /// Try to place one request now; queue it (or report unassignable) when
    /// no warm matching worker exists. Returns `true` when assigned.
    async fn try_assign(&self, request: StepRequest) -> bool {
        loop {
            let (worker_id, handle) = {
                let mut state = self.state.lock().await;
                let found = state.workers.iter().position(|w| {
                    w.info.status == WorkerStatus::Warm && w.info.satisfies(&request.step.requires)
                });
                match found {
                    Some(i) => {
                        let entry = &mut state.workers[i];
                        // Optimistically busy; reverted if the worker rejects
                        entry.info.status = WorkerStatus::Busy;
                        entry.current = Some(InFlight {
                            run_id: request.run_id,
                            step_execution_id: request.step_execution_id,
                            step_id: request.step.id.clone(),
                            attempt: request.attempt,
                        });
                        (entry.info.id.clone(), Arc::clone(&entry.handle))
                    }
                    None => {
                        let satisfiable = state
                            .workers
                            .iter()
                            .any(|w| w.info.satisfies(&request.step.requires));
                        if satisfiable {
                            state.queue.push_back(request);
                        } else {
                            warn!(
                                run_id = %request.run_id,
                                step_id = %request.step.id,
                                requires = ?request.step.requires,
                                "no registered worker satisfies step requirements"
                            );
                            let _ = self.engine_tx.send(PoolEvent::StepUnassignable {
                                run_id: request.run_id,
                                step_id: request.step.id.clone(),
                                attempt: request.attempt,
                                requires: request.step.requires.clone(),
                            });
                        }
                        return false;
                    }
                }
            };

            let sandbox = self.sandbox_for(&request);
            let assignment = StepAssignment {
                run_id: request.run_id,
                step_execution_id: request.step_execution_id,
                step: request.step.clone(),
                attempt: request.attempt,
                sandbox,
            };
            let reporter = WorkerReporter {
                worker_id: worker_id.clone(),
                run_id: request.run_id,
                step_id: request.step.id.clone(),
                attempt: request.attempt,
                tx: self.worker_tx.clone(),
            };

            match handle.assign(assignment, reporter).await {
                Ok(()) => {
                    debug!(
                        worker_id = %worker_id,
                        run_id = %request.run_id,
                        step_id = %request.step.id,
                        attempt = request.attempt,
                        "step assigned"
                    );
                    let _ = self.engine_tx.send(PoolEvent::StepStarted {
                        run_id: request.run_id,
                        step_id: request.step.id.clone(),
                        attempt: request.attempt,
                        worker_id,
                    });
                    return true;
                }
                Err(rejected) => {
                    debug!(worker_id = %worker_id, reason = %rejected.reason, "assignment rejected");
                    let mut state = self.state.lock().await;
                    if let Some(entry) = state.workers.iter_mut().find(|w| w.info.id == worker_id) {
                        entry.current = None;
                        if entry.info.status == WorkerStatus::Busy {
                            entry.info.status = WorkerStatus::Warm;
                        }
                    }
                    // Loop to try the next candidate
                }
            }
        }
    }

    /// The sandbox a step runs under: the pool floor tightened by the
    /// step's own overrides. Overrides can never loosen the floor.
    fn sandbox_for(&self, request: &StepRequest) -> SandboxSpec {
        let floor = SandboxSpec::floor(self.config.control_endpoint.clone());
        match &request.step.sandbox {
            Some(overrides) => floor.tightened_by(overrides),
            None => floor,
        }
    }

    /// Hand queued requests to newly free workers, oldest first. Requests
    /// with no matching free worker keep their queue position.
    async fn drain_queue(&self) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                let position = state.queue.iter().position(|request| {
                    state.workers.iter().any(|w| {
                        w.info.status == WorkerStatus::Warm && w.info.satisfies(&request.step.requires)
                    })
                });
                match position {
                    Some(i) => state.queue.remove(i),
                    None => None,
                }
            };
            match next {
                Some(request) => {
                    self.try_assign(request).await;
                }
                None => break,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Background loops
    // -----------------------------------------------------------------------

    async fn report_loop(
        pool: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
        shutdown: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = rx.recv() => match message {
                    Some(m) => m,
                    None => break,
                },
            };
            match message {
                WorkerMessage::Log(event) => {
                    let _ = pool.engine_tx.send(PoolEvent::StepLog(event));
                }
                WorkerMessage::Completed {
                    worker_id,
                    run_id,
                    step_id,
                    attempt,
                    result,
                } => {
                    {
                        let mut state = pool.state.lock().await;
                        if let Some(position) =
                            state.workers.iter().position(|w| w.info.id == worker_id)
                        {
                            let entry = &mut state.workers[position];
                            // Only clear if it still owns this assignment
                            let owns = entry.current.as_ref().is_some_and(|c| {
                                c.run_id == run_id && c.step_id == step_id && c.attempt == attempt
                            });
                            if owns {
                                entry.current = None;
                                match entry.info.status {
                                    WorkerStatus::Draining => {
                                        info!(worker_id = %worker_id, "drained worker removed");
                                        state.workers.remove(position);
                                    }
                                    WorkerStatus::Busy => {
                                        entry.info.status = WorkerStatus::Warm;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                    let _ = pool.engine_tx.send(PoolEvent::StepCompleted {
                        run_id,
                        step_id,
                        attempt,
                        result,
                    });
                    pool.drain_queue().await;
                }
            }
        }
    }

    /// Flip workers unhealthy after a missed heartbeat interval, report
    /// their in-flight steps as lost, and remove them after the grace
    /// period. A step is never left `running` on a dead worker.
    async fn monitor_loop(pool: Arc<Self>, shutdown: CancellationToken) {
        let tick = std::time::Duration::from_secs(pool.config.heartbeat_interval_secs.max(4) / 4);
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = Utc::now();
            let mut lost: Vec<(Uuid, String, u32, WorkerId)> = Vec::new();
            {
                let mut state = pool.state.lock().await;
                let deadline = pool.config.heartbeat_interval_secs as i64;
                let grace = (pool.config.heartbeat_interval_secs + pool.config.unhealthy_grace_secs) as i64;

                for entry in &mut state.workers {
                    let silent_for = silent_seconds(now, entry.info.last_heartbeat_at);
                    if silent_for > deadline && entry.info.status != WorkerStatus::Unhealthy {
                        warn!(worker_id = %entry.info.id, silent_for, "worker missed heartbeat deadline");
                        entry.info.status = WorkerStatus::Unhealthy;
                        if let Some(inflight) = entry.current.take() {
                            lost.push((
                                inflight.run_id,
                                inflight.step_id,
                                inflight.attempt,
                                entry.info.id.clone(),
                            ));
                        }
                    }
                }
                state.workers.retain(|entry| {
                    let expired = entry.info.status == WorkerStatus::Unhealthy
                        && silent_seconds(now, entry.info.last_heartbeat_at) > grace;
                    if expired {
                        info!(worker_id = %entry.info.id, "unhealthy worker removed from pool");
                    }
                    !expired
                });
            }
            for (run_id, step_id, attempt, worker_id) in lost {
                let _ = pool.engine_tx.send(PoolEvent::StepLost {
                    run_id,
                    step_id,
                    attempt,
                    worker_id,
                });
            }
        }
    }
}

fn silent_seconds(now: DateTime<Utc>, last: DateTime<Utc>) -> i64 {
    (now - last).num_seconds()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::AssignRejected;
    use forgeflow_types::plan::{StepConfig, StepDefinition, StepKind};
    use forgeflow_types::run::StepOutcome;
    use forgeflow_types::worker::SandboxOverrides;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Records assignments; completes only when the test says so. With
    /// `rejects` set it declines every assignment instead.
    #[derive(Clone, Default)]
    struct StubWorker {
        rejects: bool,
        assignments: Arc<StdMutex<Vec<StepAssignment>>>,
        reporters: Arc<StdMutex<Vec<WorkerReporter>>>,
        cancelled: Arc<StdMutex<Vec<Uuid>>>,
    }

    impl WorkerHandle for StubWorker {
        async fn assign(
            &self,
            assignment: StepAssignment,
            reporter: WorkerReporter,
        ) -> Result<(), AssignRejected> {
            if self.rejects {
                return Err(AssignRejected {
                    reason: "worker is shutting down".to_string(),
                });
            }
            self.assignments.lock().unwrap().push(assignment);
            self.reporters.lock().unwrap().push(reporter);
            Ok(())
        }

        async fn cancel(&self, step_execution_id: Uuid) {
            self.cancelled.lock().unwrap().push(step_execution_id);
        }
    }

    impl StubWorker {
        fn assigned_steps(&self) -> Vec<String> {
            self.assignments.lock().unwrap().iter().map(|a| a.step.id.clone()).collect()
        }

        fn complete_next(&self) {
            let reporter = self.reporters.lock().unwrap().remove(0);
            reporter.report(StepResult {
                outcome: StepOutcome::Success,
                exit_code: Some(0),
                output: None,
                message: None,
            });
        }
    }

    fn shell_step(id: &str, requires: Vec<&str>) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            kind: StepKind::Shell,
            config: StepConfig::Shell {
                command: "true".to_string(),
                env: HashMap::new(),
            },
            depends_on: vec![],
            timeout_secs: None,
            output_schema: None,
            requires: requires.into_iter().map(String::from).collect(),
            sandbox: None,
        }
    }

    fn request(step: StepDefinition) -> StepRequest {
        StepRequest {
            run_id: Uuid::now_v7(),
            step_execution_id: Uuid::now_v7(),
            step,
            attempt: 1,
        }
    }

    fn pool_with(
        config: PoolConfig,
    ) -> (Arc<PoolManager<StubWorker>>, mpsc::UnboundedReceiver<PoolEvent>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let pool = PoolManager::spawn(config, tx, shutdown.clone());
        (pool, rx, shutdown)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<PoolEvent>) -> PoolEvent {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for pool event")
            .expect("pool event channel closed")
    }

    // -----------------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn assigns_to_first_matching_warm_worker() {
        let (pool, mut rx, _shutdown) = pool_with(PoolConfig::default());
        let cpu = StubWorker::default();
        let gpu = StubWorker::default();
        pool.register("cpu-1", vec!["linux".to_string()], cpu.clone()).await;
        pool.register("gpu-1", vec!["linux".to_string(), "gpu".to_string()], gpu.clone()).await;

        pool.submit(request(shell_step("train", vec!["gpu"]))).await;

        match recv(&mut rx).await {
            PoolEvent::StepStarted { step_id, worker_id, .. } => {
                assert_eq!(step_id, "train");
                assert_eq!(worker_id, "gpu-1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(cpu.assigned_steps().is_empty());
        assert_eq!(gpu.assigned_steps(), vec!["train"]);
    }

    #[tokio::test]
    async fn rejected_assignment_falls_through_to_next_worker() {
        let (pool, mut rx, _shutdown) = pool_with(PoolConfig::default());
        let declining = StubWorker { rejects: true, ..Default::default() };
        let accepting = StubWorker::default();
        // Registration order puts the declining worker first in the scan
        pool.register("w-1", vec![], declining.clone()).await;
        pool.register("w-2", vec![], accepting.clone()).await;

        pool.submit(request(shell_step("build", vec![]))).await;

        match recv(&mut rx).await {
            PoolEvent::StepStarted { step_id, worker_id, .. } => {
                assert_eq!(step_id, "build");
                assert_eq!(worker_id, "w-2");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(declining.assigned_steps().is_empty());
        assert_eq!(accepting.assigned_steps(), vec!["build"]);

        // The declining worker was reverted to warm, not left busy
        let workers = pool.workers().await;
        let declined = workers.iter().find(|w| w.id == "w-1").unwrap();
        assert_eq!(declined.status, WorkerStatus::Warm);
    }

    #[tokio::test]
    async fn queues_fifo_when_all_workers_busy() {
        let (pool, mut rx, _shutdown) = pool_with(PoolConfig::default());
        let worker = StubWorker::default();
        pool.register("w-1", vec![], worker.clone()).await;

        pool.submit(request(shell_step("first", vec![]))).await;
        pool.submit(request(shell_step("second", vec![]))).await;
        pool.submit(request(shell_step("third", vec![]))).await;

        assert!(matches!(recv(&mut rx).await, PoolEvent::StepStarted { .. }));
        assert_eq!(worker.assigned_steps(), vec!["first"]);

        worker.complete_next();
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepCompleted { .. }));
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepStarted { .. }));
        assert_eq!(worker.assigned_steps(), vec!["first", "second"]);

        worker.complete_next();
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepCompleted { .. }));
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepStarted { .. }));
        assert_eq!(worker.assigned_steps(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn unsatisfiable_requirements_reported_not_queued() {
        let (pool, mut rx, _shutdown) = pool_with(PoolConfig::default());
        pool.register("cpu-1", vec!["linux".to_string()], StubWorker::default()).await;

        pool.submit(request(shell_step("train", vec!["gpu"]))).await;

        match recv(&mut rx).await {
            PoolEvent::StepUnassignable { step_id, requires, .. } => {
                assert_eq!(step_id, "train");
                assert_eq!(requires, vec!["gpu"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sandbox_floor_is_tighten_only() {
        let (pool, mut rx, _shutdown) = pool_with(PoolConfig::default());
        let worker = StubWorker::default();
        pool.register("w-1", vec![], worker.clone()).await;

        let mut step = shell_step("fetch", vec![]);
        step.sandbox = Some(SandboxOverrides {
            cpu_millis: Some(500),
            memory_mb: Some(64_000), // attempt to raise, must clamp to floor
            disk_mb: None,
            allowed_hosts: vec!["crates.io".to_string()],
        });
        pool.submit(request(step)).await;
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepStarted { .. }));

        let assignment = worker.assignments.lock().unwrap().remove(0);
        let floor = SandboxSpec::floor(PoolConfig::default().control_endpoint);
        assert_eq!(assignment.sandbox.cpu_millis, 500);
        assert_eq!(assignment.sandbox.memory_mb, floor.memory_mb);
        assert!(assignment.sandbox.network_allowlist.contains(&floor.network_allowlist[0]));
        assert!(assignment.sandbox.network_allowlist.contains(&"crates.io".to_string()));
    }

    #[tokio::test]
    async fn draining_worker_gets_no_new_work_and_leaves_after_finishing() {
        let (pool, mut rx, _shutdown) = pool_with(PoolConfig::default());
        let worker = StubWorker::default();
        pool.register("w-1", vec![], worker.clone()).await;

        pool.submit(request(shell_step("current", vec![]))).await;
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepStarted { .. }));

        pool.drain("w-1").await;
        pool.submit(request(shell_step("next", vec![]))).await;

        worker.complete_next();
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepCompleted { .. }));

        // Worker removed after draining; "next" stays queued
        assert!(pool.workers().await.is_empty());
        assert_eq!(worker.assigned_steps(), vec!["current"]);
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn missed_heartbeat_flips_unhealthy_and_reports_lost_step() {
        let config = PoolConfig {
            heartbeat_interval_secs: 15,
            unhealthy_grace_secs: 120,
            ..Default::default()
        };
        let (pool, mut rx, _shutdown) = pool_with(config);
        let worker = StubWorker::default();
        pool.register("w-1", vec![], worker.clone()).await;

        pool.submit(request(shell_step("long", vec![]))).await;
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepStarted { .. }));

        // No heartbeats arrive; monitor fires past the deadline. Paused-time
        // sleeps auto-advance the clock, but chrono follows the real clock,
        // so stamp the heartbeat into the past instead.
        {
            let mut state = pool.state.lock().await;
            state.workers[0].info.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(30);
        }
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;

        match recv(&mut rx).await {
            PoolEvent::StepLost { step_id, worker_id, .. } => {
                assert_eq!(step_id, "long");
                assert_eq!(worker_id, "w-1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(pool.workers().await[0].status, WorkerStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_worker_removed_after_grace_period() {
        let config = PoolConfig {
            heartbeat_interval_secs: 15,
            unhealthy_grace_secs: 60,
            ..Default::default()
        };
        let (pool, _rx, _shutdown) = pool_with(config);
        pool.register("w-1", vec![], StubWorker::default()).await;

        {
            let mut state = pool.state.lock().await;
            state.workers[0].info.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(300);
        }
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;

        assert!(pool.workers().await.is_empty());
    }

    #[tokio::test]
    async fn heartbeat_recovers_unhealthy_worker() {
        let (pool, _rx, _shutdown) = pool_with(PoolConfig::default());
        pool.register("w-1", vec![], StubWorker::default()).await;

        {
            let mut state = pool.state.lock().await;
            state.workers[0].info.status = WorkerStatus::Unhealthy;
        }
        assert!(pool.heartbeat("w-1").await);
        assert_eq!(pool.workers().await[0].status, WorkerStatus::Warm);

        assert!(!pool.heartbeat("unknown").await);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancel_step_reaches_the_assigned_worker() {
        let (pool, mut rx, _shutdown) = pool_with(PoolConfig::default());
        let worker = StubWorker::default();
        pool.register("w-1", vec![], worker.clone()).await;

        let req = request(shell_step("long", vec![]));
        let run_id = req.run_id;
        let exec_id = req.step_execution_id;
        pool.submit(req).await;
        assert!(matches!(recv(&mut rx).await, PoolEvent::StepStarted { .. }));

        pool.cancel_step(run_id, "long").await;
        assert_eq!(worker.cancelled.lock().unwrap().as_slice(), &[exec_id]);
    }
}
