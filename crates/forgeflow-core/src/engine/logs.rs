//! Per-step log reordering.
//!
//! Workers emit log events with per-step sequence numbers, but delivery may
//! arrive out of order. The buffer releases events only in strictly
//! increasing sequence order per `(run_id, step_id)`; late duplicates and
//! already-released sequences are dropped.

use std::collections::{BTreeMap, HashMap};

use forgeflow_types::run::LogEvent;
use uuid::Uuid;

#[derive(Debug, Default)]
struct StreamState {
    /// Next sequence the consumer expects.
    next: u64,
    /// Out-of-order events parked until the gap fills.
    parked: BTreeMap<u64, LogEvent>,
}

/// Reorder buffer covering all steps of one run.
#[derive(Debug, Default)]
pub struct LogReorderBuffer {
    streams: HashMap<(Uuid, String), StreamState>,
}

impl LogReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one event; return every event now releasable in order.
    pub fn push(&mut self, event: LogEvent) -> Vec<LogEvent> {
        let key = (event.run_id, event.step_id.clone());
        let state = self.streams.entry(key).or_default();

        if event.sequence < state.next {
            // Duplicate or already released
            return Vec::new();
        }
        state.parked.insert(event.sequence, event);

        let mut released = Vec::new();
        while let Some(event) = state.parked.remove(&state.next) {
            state.next += 1;
            released.push(event);
        }
        released
    }

    /// Release whatever is still parked for a finished step, in sequence
    /// order, gaps and all. Used when the step reaches a terminal state and
    /// no more events can arrive.
    pub fn flush(&mut self, run_id: Uuid, step_id: &str) -> Vec<LogEvent> {
        match self.streams.remove(&(run_id, step_id.to_string())) {
            Some(state) => state.parked.into_values().collect(),
            None => Vec::new(),
        }
    }
}
