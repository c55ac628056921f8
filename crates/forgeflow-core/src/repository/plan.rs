//! Plan repository trait definition.
//!
//! Plans are immutable and content-addressed; "updating" a plan means
//! storing a successor with a different hash under the same
//! `(repository, name)` key. The previous version stays resolvable by hash
//! so in-flight runs keep executing the graph they started with.

use forgeflow_types::error::RepositoryError;
use forgeflow_types::plan::Plan;

/// Storage interface for registered plans.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait PlanRepository: Send + Sync {
    /// Store a plan, making it the current version for `(repository, name)`.
    /// Superseded versions remain resolvable by content hash.
    fn save(&self, plan: &Plan) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get the current plan registered under a name.
    fn get_current(
        &self,
        repository: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Plan>, RepositoryError>> + Send;

    /// Get a specific plan version by content hash and name.
    fn get_by_hash(
        &self,
        content_hash: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Plan>, RepositoryError>> + Send;

    /// List the current plans of a repository, ordered by name.
    fn list(
        &self,
        repository: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Plan>, RepositoryError>> + Send;

    /// The content hash currently stored for a source path, if any plan from
    /// that path is registered. Used to skip re-evaluating unchanged source.
    fn source_hash(
        &self,
        repository: &str,
        source_path: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, RepositoryError>> + Send;

    /// Remove the current registration for `(repository, name)`. Returns
    /// `true` if it existed. Historic versions stay resolvable by hash.
    fn remove(
        &self,
        repository: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}

impl<P: PlanRepository> PlanRepository for std::sync::Arc<P> {
    async fn save(&self, plan: &Plan) -> Result<(), RepositoryError> {
        (**self).save(plan).await
    }

    async fn get_current(&self, repository: &str, name: &str) -> Result<Option<Plan>, RepositoryError> {
        (**self).get_current(repository, name).await
    }

    async fn get_by_hash(&self, content_hash: &str, name: &str) -> Result<Option<Plan>, RepositoryError> {
        (**self).get_by_hash(content_hash, name).await
    }

    async fn list(&self, repository: &str) -> Result<Vec<Plan>, RepositoryError> {
        (**self).list(repository).await
    }

    async fn source_hash(&self, repository: &str, source_path: &str) -> Result<Option<String>, RepositoryError> {
        (**self).source_hash(repository, source_path).await
    }

    async fn remove(&self, repository: &str, name: &str) -> Result<bool, RepositoryError> {
        (**self).remove(repository, name).await
    }
}
