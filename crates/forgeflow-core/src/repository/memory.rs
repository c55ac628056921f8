//! In-memory repository implementations backed by `DashMap`.
//!
//! Used by unit tests and single-process embedding. Semantics mirror the
//! SQLite implementations in forgeflow-infra: current plans keyed by
//! `(repository, name)`, historic versions by `(content_hash, name)`.

use dashmap::DashMap;
use forgeflow_types::error::RepositoryError;
use forgeflow_types::plan::Plan;
use forgeflow_types::run::{LogEvent, Run, RunStatus, StepExecution};
use uuid::Uuid;

use super::{PlanRepository, RunRepository};

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// In-memory `PlanRepository`.
#[derive(Debug, Default)]
pub struct InMemoryPlanRepository {
    /// (repository, name) -> current plan
    current: DashMap<(String, String), Plan>,
    /// (content_hash, name) -> plan version
    versions: DashMap<(String, String), Plan>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanRepository for InMemoryPlanRepository {
    async fn save(&self, plan: &Plan) -> Result<(), RepositoryError> {
        self.versions
            .insert((plan.content_hash.clone(), plan.name.clone()), plan.clone());
        self.current
            .insert((plan.repository.clone(), plan.name.clone()), plan.clone());
        Ok(())
    }

    async fn get_current(&self, repository: &str, name: &str) -> Result<Option<Plan>, RepositoryError> {
        Ok(self
            .current
            .get(&(repository.to_string(), name.to_string()))
            .map(|entry| entry.clone()))
    }

    async fn get_by_hash(&self, content_hash: &str, name: &str) -> Result<Option<Plan>, RepositoryError> {
        Ok(self
            .versions
            .get(&(content_hash.to_string(), name.to_string()))
            .map(|entry| entry.clone()))
    }

    async fn list(&self, repository: &str) -> Result<Vec<Plan>, RepositoryError> {
        let mut plans: Vec<Plan> = self
            .current
            .iter()
            .filter(|entry| entry.key().0 == repository)
            .map(|entry| entry.value().clone())
            .collect();
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plans)
    }

    async fn source_hash(&self, repository: &str, source_path: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .current
            .iter()
            .find(|entry| {
                entry.key().0 == repository && entry.value().source_path == source_path
            })
            .map(|entry| entry.value().content_hash.clone()))
    }

    async fn remove(&self, repository: &str, name: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .current
            .remove(&(repository.to_string(), name.to_string()))
            .is_some())
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// In-memory `RunRepository`.
#[derive(Debug, Default)]
pub struct InMemoryRunRepository {
    runs: DashMap<Uuid, Run>,
    /// (run_id, step_id) -> execution record
    steps: DashMap<(Uuid, String), StepExecution>,
    /// (run_id, step_id) -> ordered log events
    logs: DashMap<(Uuid, String), Vec<LogEvent>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunRepository for InMemoryRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        stopped_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut run = self.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.status = status;
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        if stopped_at.is_some() {
            run.stopped_at = stopped_at;
        }
        if status == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|entry| entry.clone()))
    }

    async fn list_runs(&self, plan_hash: &str, limit: u32) -> Result<Vec<Run>, RepositoryError> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|entry| entry.value().plan_hash == plan_hash)
            .map(|entry| entry.value().clone())
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn save_step(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        self.steps
            .insert((step.run_id, step.step_id.clone()), step.clone());
        Ok(())
    }

    async fn get_step(&self, run_id: &Uuid, step_id: &str) -> Result<Option<StepExecution>, RepositoryError> {
        Ok(self
            .steps
            .get(&(*run_id, step_id.to_string()))
            .map(|entry| entry.clone()))
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
        let mut steps: Vec<StepExecution> = self
            .steps
            .iter()
            .filter(|entry| entry.key().0 == *run_id)
            .map(|entry| entry.value().clone())
            .collect();
        steps.sort_by(|a, b| a.step_id.cmp(&b.step_id));
        Ok(steps)
    }

    async fn append_logs(&self, events: &[LogEvent]) -> Result<(), RepositoryError> {
        for event in events {
            self.logs
                .entry((event.run_id, event.step_id.clone()))
                .or_default()
                .push(event.clone());
        }
        Ok(())
    }

    async fn list_logs(&self, run_id: &Uuid, step_id: &str) -> Result<Vec<LogEvent>, RepositoryError> {
        let mut events = self
            .logs
            .get(&(*run_id, step_id.to_string()))
            .map(|entry| entry.clone())
            .unwrap_or_default();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forgeflow_types::run::{LogStream, StepExecutionStatus};

    fn sample_plan(name: &str, hash: &str) -> Plan {
        Plan {
            content_hash: hash.to_string(),
            name: name.to_string(),
            repository: "acme/widgets".to_string(),
            source_path: "ci/main.flow".to_string(),
            steps: vec![],
            triggers: vec![],
            input_schema: None,
            output_schema: None,
            parsed_at: Utc::now(),
        }
    }

    fn sample_run(plan_hash: &str) -> Run {
        Run {
            id: Uuid::now_v7(),
            plan_hash: plan_hash.to_string(),
            inputs: serde_json::json!({}),
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn save_supersedes_current_but_keeps_versions() {
        let repo = InMemoryPlanRepository::new();
        repo.save(&sample_plan("build", "hash-1")).await.unwrap();
        repo.save(&sample_plan("build", "hash-2")).await.unwrap();

        let current = repo.get_current("acme/widgets", "build").await.unwrap().unwrap();
        assert_eq!(current.content_hash, "hash-2");

        // The superseded version is still resolvable by hash
        assert!(repo.get_by_hash("hash-1", "build").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn source_hash_reports_current_registration() {
        let repo = InMemoryPlanRepository::new();
        assert!(repo.source_hash("acme/widgets", "ci/main.flow").await.unwrap().is_none());

        repo.save(&sample_plan("build", "hash-1")).await.unwrap();
        assert_eq!(
            repo.source_hash("acme/widgets", "ci/main.flow").await.unwrap(),
            Some("hash-1".to_string())
        );
    }

    #[tokio::test]
    async fn run_status_updates_set_timestamps() {
        let repo = InMemoryRunRepository::new();
        let run = sample_run("hash-1");
        repo.create_run(&run).await.unwrap();

        repo.update_run(&run.id, RunStatus::Running, None, None).await.unwrap();
        let stored = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert!(stored.started_at.is_some());

        repo.update_run(&run.id, RunStatus::Failed, Some("step 'a' failed"), Some(Utc::now()))
            .await
            .unwrap();
        let stored = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("step 'a' failed"));
        assert!(stored.stopped_at.is_some());
    }

    #[tokio::test]
    async fn step_records_upsert_by_run_and_step() {
        let repo = InMemoryRunRepository::new();
        let run_id = Uuid::now_v7();
        let mut step = StepExecution {
            id: Uuid::now_v7(),
            run_id,
            step_id: "build".to_string(),
            status: StepExecutionStatus::Ready,
            assigned_worker: None,
            attempt: 1,
            started_at: None,
            stopped_at: None,
            exit_code: None,
            output: None,
            error: None,
        };
        repo.save_step(&step).await.unwrap();

        step.status = StepExecutionStatus::Running;
        step.assigned_worker = Some("worker-1".to_string());
        repo.save_step(&step).await.unwrap();

        let stored = repo.get_step(&run_id, "build").await.unwrap().unwrap();
        assert_eq!(stored.status, StepExecutionStatus::Running);
        assert_eq!(repo.list_steps(&run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn logs_come_back_in_sequence_order() {
        let repo = InMemoryRunRepository::new();
        let run_id = Uuid::now_v7();
        let line = |sequence: u64| LogEvent {
            run_id,
            step_id: "build".to_string(),
            sequence,
            stream: LogStream::Stdout,
            line: format!("line {sequence}"),
        };
        repo.append_logs(&[line(2), line(0), line(1)]).await.unwrap();

        let events = repo.list_logs(&run_id, "build").await.unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }
}
