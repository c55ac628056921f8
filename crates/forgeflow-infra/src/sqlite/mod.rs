//! SQLite-backed repository implementations.

pub mod plan;
pub mod pool;
pub mod run;

pub use plan::SqlitePlanRepository;
pub use pool::DatabasePool;
pub use run::SqliteRunRepository;
