//! SQLite run repository implementation.
//!
//! Implements `RunRepository` from `forgeflow-core` using sqlx with split
//! read/write pools. Inputs and step outputs are JSON blobs; log events go
//! into an append-only table keyed by `(run_id, step_id, sequence)` so
//! redelivered events are ignored.

use chrono::{DateTime, Utc};
use forgeflow_core::repository::RunRepository;
use forgeflow_types::error::RepositoryError;
use forgeflow_types::run::{LogEvent, LogStream, Run, RunStatus, StepExecution, StepExecutionStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `RunRepository`.
pub struct SqliteRunRepository {
    pool: DatabasePool,
}

impl SqliteRunRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    plan_hash: String,
    inputs: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    stopped_at: Option<String>,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            plan_hash: row.try_get("plan_hash")?,
            inputs: row.try_get("inputs")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            stopped_at: row.try_get("stopped_at")?,
            error: row.try_get("error")?,
        })
    }

    fn into_run(self) -> Result<Run, RepositoryError> {
        let status: RunStatus = decode_status(&self.status)?;
        let inputs = serde_json::from_str(&self.inputs)
            .map_err(|e| RepositoryError::Query(format!("invalid inputs JSON: {e}")))?;
        Ok(Run {
            id: parse_uuid(&self.id)?,
            plan_hash: self.plan_hash,
            inputs,
            status,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            stopped_at: self.stopped_at.as_deref().map(parse_datetime).transpose()?,
            error: self.error,
        })
    }
}

struct StepRow {
    id: String,
    run_id: String,
    step_id: String,
    status: String,
    assigned_worker: Option<String>,
    attempt: i64,
    started_at: Option<String>,
    stopped_at: Option<String>,
    exit_code: Option<i64>,
    output: Option<String>,
    error: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            status: row.try_get("status")?,
            assigned_worker: row.try_get("assigned_worker")?,
            attempt: row.try_get("attempt")?,
            started_at: row.try_get("started_at")?,
            stopped_at: row.try_get("stopped_at")?,
            exit_code: row.try_get("exit_code")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
        })
    }

    fn into_step(self) -> Result<StepExecution, RepositoryError> {
        let status: StepExecutionStatus = decode_status(&self.status)?;
        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid step output: {e}")))
            })
            .transpose()?;
        Ok(StepExecution {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            status,
            assigned_worker: self.assigned_worker,
            attempt: self.attempt as u32,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            stopped_at: self.stopped_at.as_deref().map(parse_datetime).transpose()?,
            exit_code: self.exit_code.map(|c| c as i32),
            output,
            error: self.error,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Snake_case status text via the serde encoding, shared with the JSON API.
fn encode_status<S: serde::Serialize>(status: &S) -> Result<String, RepositoryError> {
    match serde_json::to_value(status) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        _ => Err(RepositoryError::Query("unencodable status".to_string())),
    }
}

fn decode_status<S: serde::de::DeserializeOwned>(text: &str) -> Result<S, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid status: {text}")))
}

// ---------------------------------------------------------------------------
// RunRepository impl
// ---------------------------------------------------------------------------

impl RunRepository for SqliteRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        let inputs = serde_json::to_string(&run.inputs)
            .map_err(|e| RepositoryError::Query(format!("serialize inputs: {e}")))?;

        sqlx::query(
            r#"INSERT INTO runs (id, plan_hash, inputs, status, created_at, started_at, stopped_at, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(&run.plan_hash)
        .bind(&inputs)
        .bind(encode_status(&run.status)?)
        .bind(format_datetime(&run.created_at))
        .bind(run.started_at.as_ref().map(format_datetime))
        .bind(run.stopped_at.as_ref().map(format_datetime))
        .bind(&run.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        stopped_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let status_str = encode_status(&status)?;
        let started_at = if status == RunStatus::Running {
            Some(format_datetime(&Utc::now()))
        } else {
            None
        };

        let result = sqlx::query(
            r#"UPDATE runs SET
                 status = ?,
                 error = COALESCE(?, error),
                 stopped_at = COALESCE(?, stopped_at),
                 started_at = COALESCE(started_at, ?)
               WHERE id = ?"#,
        )
        .bind(&status_str)
        .bind(error)
        .bind(stopped_at.as_ref().map(format_datetime))
        .bind(&started_at)
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RunRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self, plan_hash: &str, limit: u32) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE plan_hash = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(plan_hash)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }

    async fn save_step(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        let output = step
            .output
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize output: {e}")))?;

        sqlx::query(
            r#"INSERT INTO step_executions
               (id, run_id, step_id, status, assigned_worker, attempt,
                started_at, stopped_at, exit_code, output, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id, step_id) DO UPDATE SET
                 status = excluded.status,
                 assigned_worker = excluded.assigned_worker,
                 attempt = excluded.attempt,
                 started_at = excluded.started_at,
                 stopped_at = excluded.stopped_at,
                 exit_code = excluded.exit_code,
                 output = excluded.output,
                 error = excluded.error"#,
        )
        .bind(step.id.to_string())
        .bind(step.run_id.to_string())
        .bind(&step.step_id)
        .bind(encode_status(&step.status)?)
        .bind(&step.assigned_worker)
        .bind(step.attempt as i64)
        .bind(step.started_at.as_ref().map(format_datetime))
        .bind(step.stopped_at.as_ref().map(format_datetime))
        .bind(step.exit_code.map(|c| c as i64))
        .bind(&output)
        .bind(&step.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_step(&self, run_id: &Uuid, step_id: &str) -> Result<Option<StepExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM step_executions WHERE run_id = ? AND step_id = ?")
            .bind(run_id.to_string())
            .bind(step_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = StepRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_step()?))
            }
            None => Ok(None),
        }
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM step_executions WHERE run_id = ? ORDER BY step_id ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            steps.push(r.into_step()?);
        }
        Ok(steps)
    }

    async fn append_logs(&self, events: &[LogEvent]) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for event in events {
            // Redelivered sequences are ignored, keeping appends idempotent
            sqlx::query(
                r#"INSERT OR IGNORE INTO step_logs (run_id, step_id, sequence, stream, line)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(event.run_id.to_string())
            .bind(&event.step_id)
            .bind(event.sequence as i64)
            .bind(encode_status(&event.stream)?)
            .bind(&event.line)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn list_logs(&self, run_id: &Uuid, step_id: &str) -> Result<Vec<LogEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT sequence, stream, line FROM step_logs WHERE run_id = ? AND step_id = ? ORDER BY sequence ASC",
        )
        .bind(run_id.to_string())
        .bind(step_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let sequence: i64 = row
                .try_get("sequence")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let stream_text: String = row
                .try_get("stream")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let stream: LogStream = decode_status(&stream_text)?;
            let line: String = row
                .try_get("line")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            events.push(LogEvent {
                run_id: *run_id,
                step_id: step_id.to_string(),
                sequence: sequence as u64,
                stream,
                line,
            });
        }
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
