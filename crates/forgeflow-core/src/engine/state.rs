//! Step execution state machine.
//!
//! Transitions are monotonic: once a step reaches a terminal status it is
//! never resurrected. The one backward edge is `running -> ready`, used
//! when a lost worker forces re-assignment (with a bumped attempt count).

use forgeflow_types::run::StepExecutionStatus;

/// Whether `from -> to` is a legal step transition.
pub fn is_legal(from: StepExecutionStatus, to: StepExecutionStatus) -> bool {
    use StepExecutionStatus::*;
    match from {
        Pending => matches!(to, Ready | Skipped | Cancelled),
        Ready => matches!(to, Running | Skipped | Cancelled),
        // Ready re-entry is the lost-worker re-queue path
        Running => matches!(to, Succeeded | Failed | TimedOut | Cancelled | Ready),
        Succeeded | Failed | TimedOut | Cancelled | Skipped => false,
    }
}
