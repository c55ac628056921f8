//! In-process execution workers for the runner pool.

pub mod local;

pub use local::{AgentStepHandler, LocalWorker, NoAgent};
