//! Infrastructure implementations for Forgeflow.
//!
//! SQLite persistence (split reader/writer WAL pools) behind the repository
//! ports defined in forgeflow-core, and the in-process worker used for
//! local execution.

pub mod sqlite;
pub mod worker;
