//! End-to-end local run: evaluate a workflow, start the engine over an
//! in-memory repository, execute the steps on a `LocalWorker`, and stream
//! run events to stdout as JSON lines.
//!
//! ```text
//! cargo run -p forgeflow-infra --example local_run
//! ```

use std::sync::Arc;

use forgeflow_core::dsl;
use forgeflow_core::engine::ExecutionEngine;
use forgeflow_core::pool::PoolManager;
use forgeflow_core::repository::InMemoryRunRepository;
use forgeflow_infra::worker::LocalWorker;
use forgeflow_observe::TelemetrySettings;
use forgeflow_types::config::{EngineConfig, PoolConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WORKFLOW: &str = r#"
workflow "hello" {
  step("greet", "shell", { command: "echo hello from forgeflow" })
  step("count", "shell", { command: "seq 1 3" }, ["greet"])
}
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _telemetry = forgeflow_observe::init(&TelemetrySettings::default())?;

    let plan = dsl::evaluate_source("local/demo", "demo.flow", WORKFLOW)?
        .into_iter()
        .next()
        .ok_or("workflow source defined no workflows")?;

    let shutdown = CancellationToken::new();
    let (pool_tx, pool_rx) = mpsc::unbounded_channel();
    let pool = PoolManager::spawn(PoolConfig::default(), pool_tx, shutdown.clone());

    let scratch = tempfile::tempdir()?;
    pool.register("local-1", vec![], LocalWorker::new(scratch.path())).await;

    let repo = Arc::new(InMemoryRunRepository::new());
    let engine = ExecutionEngine::spawn(
        EngineConfig::default(),
        Arc::clone(&repo),
        Arc::clone(&pool),
        pool_rx,
        shutdown.clone(),
    );

    let mut events = engine.events();
    let run_id = engine.start_run(plan, serde_json::json!({})).await?;
    println!("started run {run_id}");

    while let Ok(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if event.is_run_terminal() {
            break;
        }
    }

    shutdown.cancel();
    Ok(())
}
