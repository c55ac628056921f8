//! In-process worker that executes steps as local child processes.
//!
//! Shell steps run under `bash -c` inside a per-assignment scratch
//! directory, with the step env plus `FORGEFLOW_*` variables injected.
//! Structured output is picked up from the file named by
//! `FORGEFLOW_OUTPUT` after the process exits. Agent steps are delegated
//! to a pluggable [`AgentStepHandler`].
//!
//! Resource limits from the sandbox spec are advisory for this worker; it
//! provides scratch isolation and env injection, not cgroup enforcement.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use forgeflow_core::pool::{AssignRejected, StepAssignment, WorkerHandle, WorkerReporter};
use forgeflow_types::plan::StepConfig;
use forgeflow_types::run::{LogStream, StepOutcome, StepResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Agent handler
// ---------------------------------------------------------------------------

/// Pluggable implementation behind `llm_agent` steps. The provider call
/// lives outside the engine; the worker only forwards prompt and model.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait AgentStepHandler: Send + Sync + 'static {
    fn run(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> impl std::future::Future<Output = Result<serde_json::Value, String>> + Send;
}

/// Default handler for workers without an agent backend: every agent step
/// fails with a user-safe reason.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAgent;

impl AgentStepHandler for NoAgent {
    async fn run(&self, _prompt: &str, _model: Option<&str>) -> Result<serde_json::Value, String> {
        Err("no agent handler is configured on this worker".to_string())
    }
}

// ---------------------------------------------------------------------------
// LocalWorker
// ---------------------------------------------------------------------------

/// A worker that runs steps as child processes of the engine's own host.
pub struct LocalWorker<A = NoAgent> {
    scratch_root: PathBuf,
    agent: Arc<A>,
    /// Cancellation tokens of in-flight assignments, by step execution id.
    running: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<A> Clone for LocalWorker<A> {
    fn clone(&self) -> Self {
        Self {
            scratch_root: self.scratch_root.clone(),
            agent: Arc::clone(&self.agent),
            running: Arc::clone(&self.running),
        }
    }
}

impl LocalWorker<NoAgent> {
    /// Worker with no agent backend; `llm_agent` steps fail cleanly.
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self::with_agent(scratch_root, NoAgent)
    }
}

impl<A: AgentStepHandler> LocalWorker<A> {
    pub fn with_agent(scratch_root: impl Into<PathBuf>, agent: A) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            agent: Arc::new(agent),
            running: Arc::new(DashMap::new()),
        }
    }
}

impl<A: AgentStepHandler> WorkerHandle for LocalWorker<A> {
    async fn assign(
        &self,
        assignment: StepAssignment,
        reporter: WorkerReporter,
    ) -> Result<(), AssignRejected> {
        match assignment.step.config.clone() {
            StepConfig::Shell { command, env } => {
                let token = CancellationToken::new();
                self.running.insert(assignment.step_execution_id, token.clone());
                let scratch = self.scratch_root.join(assignment.step_execution_id.to_string());
                let running = Arc::clone(&self.running);
                debug!(
                    run_id = %assignment.run_id,
                    step_id = %assignment.step.id,
                    attempt = assignment.attempt,
                    "shell step accepted"
                );
                tokio::spawn(async move {
                    let result = execute_shell(
                        &scratch,
                        &command,
                        &env,
                        assignment.run_id,
                        &assignment.step.id,
                        assignment.attempt,
                        &reporter,
                        token,
                    )
                    .await;
                    let _ = tokio::fs::remove_dir_all(&scratch).await;
                    running.remove(&assignment.step_execution_id);
                    reporter.report(result);
                });
                Ok(())
            }
            StepConfig::LlmAgent { prompt, model } => {
                let token = CancellationToken::new();
                self.running.insert(assignment.step_execution_id, token.clone());
                let agent = Arc::clone(&self.agent);
                let running = Arc::clone(&self.running);
                debug!(
                    run_id = %assignment.run_id,
                    step_id = %assignment.step.id,
                    "agent step accepted"
                );
                tokio::spawn(async move {
                    let result = tokio::select! {
                        outcome = agent.run(&prompt, model.as_deref()) => match outcome {
                            Ok(output) => StepResult {
                                outcome: StepOutcome::Success,
                                exit_code: None,
                                output: Some(output),
                                message: None,
                            },
                            Err(reason) => StepResult {
                                outcome: StepOutcome::Failure,
                                exit_code: None,
                                output: None,
                                message: Some(reason),
                            },
                        },
                        _ = token.cancelled() => StepResult {
                            outcome: StepOutcome::Cancelled,
                            exit_code: None,
                            output: None,
                            message: Some("cancelled".to_string()),
                        },
                    };
                    running.remove(&assignment.step_execution_id);
                    reporter.report(result);
                });
                Ok(())
            }
            StepConfig::ParallelGroup { .. } => Err(AssignRejected {
                reason: "parallel groups are coordinated by the engine, not executed on workers"
                    .to_string(),
            }),
        }
    }

    async fn cancel(&self, step_execution_id: Uuid) {
        if let Some(entry) = self.running.get(&step_execution_id) {
            entry.value().cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Shell execution
// ---------------------------------------------------------------------------

fn failure(exit_code: Option<i32>, message: impl Into<String>) -> StepResult {
    StepResult {
        outcome: StepOutcome::Failure,
        exit_code,
        output: None,
        message: Some(message.into()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_shell(
    scratch: &Path,
    shell_command: &str,
    env: &HashMap<String, String>,
    run_id: Uuid,
    step_id: &str,
    attempt: u32,
    reporter: &WorkerReporter,
    cancel: CancellationToken,
) -> StepResult {
    if let Err(e) = tokio::fs::create_dir_all(scratch).await {
        return failure(None, format!("failed to prepare scratch directory: {e}"));
    }
    let output_path = scratch.join("output.json");

    let mut command = Command::new("bash");
    command
        .arg("-c")
        .arg(shell_command)
        .current_dir(scratch)
        .env("FORGEFLOW_RUN_ID", run_id.to_string())
        .env("FORGEFLOW_STEP_ID", step_id)
        .env("FORGEFLOW_ATTEMPT", attempt.to_string())
        .env("FORGEFLOW_SCRATCH", scratch)
        .env("FORGEFLOW_OUTPUT", &output_path)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return failure(None, format!("failed to spawn step process: {e}")),
    };

    // One shared counter keeps sequences unique across both streams; the
    // engine re-sequences on arrival order anyway.
    let sequence = Arc::new(AtomicU64::new(0));
    let readers = [
        child
            .stdout
            .take()
            .map(|s| spawn_line_reader(s, LogStream::Stdout, reporter.clone(), Arc::clone(&sequence))),
        child
            .stderr
            .take()
            .map(|s| spawn_line_reader(s, LogStream::Stderr, reporter.clone(), Arc::clone(&sequence))),
    ];

    let mut cancelled = false;
    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => {
            warn!(%run_id, step_id, "killing cancelled step process");
            let _ = child.kill().await;
            cancelled = true;
            None
        }
    };

    // Readers finish once the pipes close; joining them here keeps all log
    // lines ahead of the final report in the channel.
    for handle in readers.into_iter().flatten() {
        let _ = handle.await;
    }

    if cancelled {
        return StepResult {
            outcome: StepOutcome::Cancelled,
            exit_code: None,
            output: None,
            message: Some("cancelled".to_string()),
        };
    }

    let status = match status {
        Some(Ok(status)) => status,
        Some(Err(e)) => return failure(None, format!("failed to await step process: {e}")),
        None => return failure(None, "step process vanished".to_string()),
    };

    let output = match tokio::fs::read(&output_path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(_) => return failure(status.code(), "step output is not valid JSON"),
        },
        // No output file written; that is fine for steps without output
        Err(_) => None,
    };

    if status.success() {
        StepResult {
            outcome: StepOutcome::Success,
            exit_code: status.code(),
            output,
            message: None,
        }
    } else {
        let message = match status.code() {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };
        StepResult {
            outcome: StepOutcome::Failure,
            exit_code: status.code(),
            output,
            message: Some(message),
        }
    }
}

fn spawn_line_reader<R>(
    stream: R,
    kind: LogStream,
    reporter: WorkerReporter,
    sequence: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let seq = sequence.fetch_add(1, Ordering::SeqCst);
            reporter.log(seq, kind, line);
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
