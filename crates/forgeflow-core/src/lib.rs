//! Core logic and repository trait definitions for Forgeflow.
//!
//! This crate turns workflow source into immutable plans (`dsl`, `graph`,
//! `registry`), executes plans on a worker fleet (`engine`, `pool`), and
//! defines the "ports" (`repository`) that the infrastructure layer
//! implements. It depends only on `forgeflow-types` -- never on
//! `forgeflow-infra` or any database/IO crate.

pub mod config;
pub mod dsl;
pub mod engine;
pub mod event;
pub mod graph;
pub mod pool;
pub mod registry;
pub mod repository;
