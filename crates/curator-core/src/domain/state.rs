//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state.
///
/// State transitions:
/// - Waiting -> Running -> Completed
/// - Waiting -> Running -> Failed
/// - Waiting -> Canceled (never started)
/// - Running -> Canceling -> Canceled (cooperative stop)
/// - Running -> Canceling -> Failed (grace period exceeded)
///
/// All transitions out of Waiting/Running are terminal-or-Canceling and
/// monotonic: no task ever regresses to an earlier state. The store enforces
/// this by checking the source state on every write.
///
/// Design note: Using an enum ensures exhaustive matching and prevents
/// invalid states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Submitted, reservations declared, not yet claimed by a worker.
    Waiting,

    /// Claimed by a worker; reservations are held.
    Running,

    /// A cancel request reached a Running task; the owning worker has been
    /// asked to stop. Reservations are still held.
    Canceling,

    /// Finished successfully.
    Completed,

    /// Finished with a structured failure record.
    Failed,

    /// Stopped before completion (either never started, or stopped
    /// cooperatively after a cancel request).
    Canceled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// Is the task currently owned by a worker (reservations held)?
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Running | TaskState::Canceling)
    }

    /// Is this task eligible for a claim?
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskState::Waiting)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Canceling => "canceling",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Waiting, false)]
    #[case(TaskState::Running, false)]
    #[case(TaskState::Canceling, false)]
    #[case(TaskState::Completed, true)]
    #[case(TaskState::Failed, true)]
    #[case(TaskState::Canceled, true)]
    fn terminal_states(#[case] state: TaskState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
    }

    #[test]
    fn active_means_worker_owned() {
        assert!(TaskState::Running.is_active());
        assert!(TaskState::Canceling.is_active());
        assert!(!TaskState::Waiting.is_active());
        assert!(!TaskState::Completed.is_active());
    }

    #[test]
    fn only_waiting_is_claimable() {
        assert!(TaskState::Waiting.is_claimable());
        assert!(!TaskState::Running.is_claimable());
        assert!(!TaskState::Canceling.is_claimable());
        assert!(!TaskState::Canceled.is_claimable());
    }
}
