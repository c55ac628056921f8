//! Shared domain types for Forgeflow.
//!
//! Pure data definitions: plans, runs, workers, events, schemas, errors,
//! and configuration. No business logic and no I/O -- the core crate owns
//! behavior, the infra crate owns persistence.

pub mod config;
pub mod error;
pub mod event;
pub mod plan;
pub mod run;
pub mod schema;
pub mod worker;
