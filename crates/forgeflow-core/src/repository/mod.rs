//! Repository trait definitions (ports).
//!
//! The engine and registry talk to storage only through these traits; the
//! infrastructure layer (forgeflow-infra) implements them with SQLite. The
//! in-memory implementations back unit tests and single-process embedding.

mod memory;
mod plan;
mod run;

pub use memory::{InMemoryPlanRepository, InMemoryRunRepository};
pub use plan::PlanRepository;
pub use run::RunRepository;
