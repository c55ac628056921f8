//! Observability setup for Forgeflow.
//!
//! One call wires structured logging, and optionally OpenTelemetry span
//! export, for a process embedding the engine.

pub mod telemetry;

pub use telemetry::{init, TelemetryGuard, TelemetrySettings};
