//! SQLite plan repository implementation.
//!
//! Implements `PlanRepository` from `forgeflow-core` using sqlx with split
//! read/write pools. Plan bodies are stored as JSON blobs; every evaluated
//! version is kept in `plan_versions` while `current_plans` holds the
//! mutable pointer per `(repository, name)`.

use forgeflow_core::repository::PlanRepository;
use forgeflow_types::error::RepositoryError;
use forgeflow_types::plan::Plan;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `PlanRepository`.
pub struct SqlitePlanRepository {
    pool: DatabasePool,
}

impl SqlitePlanRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn decode_plan(definition: &str) -> Result<Plan, RepositoryError> {
    serde_json::from_str(definition)
        .map_err(|e| RepositoryError::Query(format!("invalid plan JSON: {e}")))
}

impl PlanRepository for SqlitePlanRepository {
    async fn save(&self, plan: &Plan) -> Result<(), RepositoryError> {
        let definition = serde_json::to_string(plan)
            .map_err(|e| RepositoryError::Query(format!("serialize plan: {e}")))?;

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO plan_versions (content_hash, name, repository, source_path, definition, parsed_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(content_hash, name) DO UPDATE SET
                 definition = excluded.definition,
                 parsed_at = excluded.parsed_at"#,
        )
        .bind(&plan.content_hash)
        .bind(&plan.name)
        .bind(&plan.repository)
        .bind(&plan.source_path)
        .bind(&definition)
        .bind(plan.parsed_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO current_plans (repository, name, content_hash, source_path)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(repository, name) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 source_path = excluded.source_path"#,
        )
        .bind(&plan.repository)
        .bind(&plan.name)
        .bind(&plan.content_hash)
        .bind(&plan.source_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_current(&self, repository: &str, name: &str) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT v.definition FROM current_plans c
               JOIN plan_versions v ON v.content_hash = c.content_hash AND v.name = c.name
               WHERE c.repository = ? AND c.name = ?"#,
        )
        .bind(repository)
        .bind(name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let definition: String = row
                    .try_get("definition")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(decode_plan(&definition)?))
            }
            None => Ok(None),
        }
    }

    async fn get_by_hash(&self, content_hash: &str, name: &str) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(
            "SELECT definition FROM plan_versions WHERE content_hash = ? AND name = ?",
        )
        .bind(content_hash)
        .bind(name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let definition: String = row
                    .try_get("definition")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(decode_plan(&definition)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, repository: &str) -> Result<Vec<Plan>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT v.definition FROM current_plans c
               JOIN plan_versions v ON v.content_hash = c.content_hash AND v.name = c.name
               WHERE c.repository = ?
               ORDER BY c.name ASC"#,
        )
        .bind(repository)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut plans = Vec::with_capacity(rows.len());
        for row in &rows {
            let definition: String = row
                .try_get("definition")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            plans.push(decode_plan(&definition)?);
        }
        Ok(plans)
    }

    async fn source_hash(&self, repository: &str, source_path: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query(
            "SELECT content_hash FROM current_plans WHERE repository = ? AND source_path = ? LIMIT 1",
        )
        .bind(repository)
        .bind(source_path)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                row.try_get("content_hash")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn remove(&self, repository: &str, name: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM current_plans WHERE repository = ? AND name = ?")
            .bind(repository)
            .bind(name)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_plan(name: &str, hash: &str, source_path: &str) -> Plan {
        Plan {
            content_hash: hash.to_string(),
            name: name.to_string(),
            repository: "acme/widgets".to_string(),
            source_path: source_path.to_string(),
            steps: vec![],
            triggers: vec![],
            input_schema: None,
            output_schema: None,
            parsed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_get_current() {
        let repo = SqlitePlanRepository::new(test_pool().await);
        let plan = sample_plan("build", "hash-1", "ci/main.flow");

        repo.save(&plan).await.unwrap();

        let loaded = repo.get_current("acme/widgets", "build").await.unwrap().unwrap();
        assert_eq!(loaded.content_hash, "hash-1");
        assert_eq!(loaded.source_path, "ci/main.flow");

        assert!(repo.get_current("other/repo", "build").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_supersedes_current_but_keeps_versions() {
        let repo = SqlitePlanRepository::new(test_pool().await);
        repo.save(&sample_plan("build", "hash-1", "ci/main.flow")).await.unwrap();
        repo.save(&sample_plan("build", "hash-2", "ci/main.flow")).await.unwrap();

        let current = repo.get_current("acme/widgets", "build").await.unwrap().unwrap();
        assert_eq!(current.content_hash, "hash-2");

        // The superseded version is still resolvable by hash
        let old = repo.get_by_hash("hash-1", "build").await.unwrap();
        assert!(old.is_some());
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_name() {
        let repo = SqlitePlanRepository::new(test_pool().await);
        repo.save(&sample_plan("deploy", "hash-d", "ci/deploy.flow")).await.unwrap();
        repo.save(&sample_plan("build", "hash-b", "ci/build.flow")).await.unwrap();

        let plans = repo.list("acme/widgets").await.unwrap();
        let names: Vec<&str> = plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["build", "deploy"]);
    }

    #[tokio::test]
    async fn test_source_hash_tracks_current_registration() {
        let repo = SqlitePlanRepository::new(test_pool().await);
        assert!(repo.source_hash("acme/widgets", "ci/main.flow").await.unwrap().is_none());

        repo.save(&sample_plan("build", "hash-1", "ci/main.flow")).await.unwrap();
        assert_eq!(
            repo.source_hash("acme/widgets", "ci/main.flow").await.unwrap(),
            Some("hash-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove_drops_current_but_not_versions() {
        let repo = SqlitePlanRepository::new(test_pool().await);
        repo.save(&sample_plan("build", "hash-1", "ci/main.flow")).await.unwrap();

        assert!(repo.remove("acme/widgets", "build").await.unwrap());
        assert!(repo.get_current("acme/widgets", "build").await.unwrap().is_none());
        // Historic version survives for in-flight runs
        assert!(repo.get_by_hash("hash-1", "build").await.unwrap().is_some());

        assert!(!repo.remove("acme/widgets", "build").await.unwrap());
    }
}
