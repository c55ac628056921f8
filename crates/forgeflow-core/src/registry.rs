//! Definition registry: sync workflow source into stored plans.
//!
//! The registry pulls candidate source files from a `DefinitionSource`,
//! skips files whose content hash already matches the stored registration,
//! evaluates the rest, and persists the resulting plans. A batch is never
//! all-or-nothing across files: each file fails or registers on its own.

use forgeflow_types::error::RepositoryError;
use tracing::{debug, info, warn};

use crate::dsl::{self, DslError};
use crate::repository::PlanRepository;

// ---------------------------------------------------------------------------
// Source collaborator
// ---------------------------------------------------------------------------

/// One candidate workflow definition file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Repository-relative path (e.g. "ci/main.flow").
    pub path: String,
    pub contents: String,
}

/// Lists workflow definition files of a repository. The registry only ever
/// reads through this trait; it never writes source back.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait DefinitionSource: Send + Sync {
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<SourceFile>, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// Sync report
// ---------------------------------------------------------------------------

/// Outcome of one registry sync pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Plan names registered (or re-registered with a new hash).
    pub registered: Vec<RegisteredPlan>,
    /// Source paths skipped because their content hash was unchanged.
    pub skipped: Vec<String>,
    /// Per-file failures; the rest of the batch still registered.
    pub failures: Vec<SyncFailure>,
}

#[derive(Debug, Clone)]
pub struct RegisteredPlan {
    pub name: String,
    pub source_path: String,
    pub content_hash: String,
}

#[derive(Debug)]
pub struct SyncFailure {
    pub source_path: String,
    pub error: DslError,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Evaluates changed definition files and persists the resulting plans.
pub struct DefinitionRegistry<S, P> {
    source: S,
    plans: P,
}

impl<S: DefinitionSource, P: PlanRepository> DefinitionRegistry<S, P> {
    pub fn new(source: S, plans: P) -> Self {
        Self { source, plans }
    }

    /// Sync one repository's definitions into the plan store.
    ///
    /// Files whose canonicalized content hash matches the stored
    /// registration are skipped without evaluation. Evaluation failures are
    /// isolated per file and collected into the report.
    pub async fn sync(&self, repository: &str) -> Result<SyncReport, RepositoryError> {
        let files = self.source.list().await?;
        let mut report = SyncReport::default();

        for file in files {
            let hash = dsl::content_hash(&file.contents);
            if self.plans.source_hash(repository, &file.path).await? == Some(hash.clone()) {
                debug!(repository, path = %file.path, "definition unchanged, skipping");
                report.skipped.push(file.path);
                continue;
            }

            match dsl::evaluate_source(repository, &file.path, &file.contents) {
                Ok(plans) => {
                    for plan in plans {
                        info!(
                            repository,
                            path = %file.path,
                            name = %plan.name,
                            hash = %plan.content_hash,
                            "registered plan"
                        );
                        report.registered.push(RegisteredPlan {
                            name: plan.name.clone(),
                            source_path: file.path.clone(),
                            content_hash: plan.content_hash.clone(),
                        });
                        self.plans.save(&plan).await?;
                    }
                }
                Err(error) => {
                    warn!(repository, path = %file.path, %error, "definition rejected");
                    report.failures.push(SyncFailure {
                        source_path: file.path,
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Read access to the underlying plan store.
    pub fn plans(&self) -> &P {
        &self.plans
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
