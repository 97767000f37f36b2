//! Outcome model: the shapes a task run can end in.
//!
//! This module is architecture-agnostic: it does not assume workers or
//! persistence. It only defines the "shape" of results that the rest of the
//! system records and acts on.

use serde::{Deserialize, Serialize};

use super::errors::TaskFailure;

/// What a handler body reports back to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// The body finished its work. `result_refs` are opaque identifiers of
    /// whatever it produced (publications, import reports, ...), exposed to
    /// external consumers through the task record.
    Success {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        result_refs: Vec<String>,
    },

    /// The body observed a cancel request and stopped at a safe point.
    Canceled,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self::Success {
            result_refs: Vec::new(),
        }
    }

    pub fn success_with(result_refs: Vec<String>) -> Self {
        Self::Success { result_refs }
    }
}

/// The terminal write the supervisor (or sweeper) hands to the store.
///
/// The store applies the state transition and releases the task's
/// reservations in the same atomic step.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Completed { result_refs: Vec<String> },
    Failed { failure: TaskFailure },
    Canceled,
}

/// What `cancel_task` did. Cancellation is idempotent: repeating it never
/// errors and never changes the answer a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was Waiting and is now Canceled, synchronously.
    Canceled,

    /// The task was Running; the owning worker has been asked to stop.
    /// Returns immediately, the actual stop happens out-of-band.
    Canceling,

    /// The task was already terminal; nothing to do.
    AlreadyFinished,
}
