//! Error types: the library error enum and the structured failure record
//! persisted on failed tasks.
//!
//! The two are deliberately separate. [`CuratorError`] is what API calls
//! return to the caller in-process; [`TaskFailure`] is durable data, written
//! into the task row so that a caller querying a task later can tell a
//! body-level failure apart from a lost worker.

use serde::{Deserialize, Serialize};
use std::fmt;

use thiserror::Error;

use super::ids::TaskId;

/// Scheduler-level error.
#[derive(Debug, Error)]
pub enum CuratorError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("worker not registered: {0}")]
    UnknownWorker(String),

    #[error("duplicate handler for task name={0}")]
    DuplicateHandler(String),

    #[error("invalid task spec: {0}")]
    InvalidSpec(String),

    /// Transient store fault. Loops back off and retry instead of crashing:
    /// a false liveness timeout would incorrectly fail a healthy worker's
    /// task.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    Other(String),
}

/// Classification of a terminal failure, persisted with the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The task body itself returned an error (or panicked).
    Body,

    /// The owning worker's heartbeat expired; the sweeper reclaimed the task.
    WorkerLost,

    /// The body ignored a cancel request past the grace period and was
    /// terminated forcefully.
    CancelTimeout,

    /// The owning worker deregistered while the task was still running.
    WorkerShutdown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Body => "body",
            FailureKind::WorkerLost => "worker lost",
            FailureKind::CancelTimeout => "cancel timeout",
            FailureKind::WorkerShutdown => "worker shutdown",
        };
        f.write_str(s)
    }
}

/// Structured failure record stored on a Failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn body(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Body,
            message: message.into(),
        }
    }

    pub fn worker_lost(worker: impl fmt::Display) -> Self {
        Self {
            kind: FailureKind::WorkerLost,
            message: format!("worker {worker} lost (heartbeat expired)"),
        }
    }

    pub fn cancel_timeout() -> Self {
        Self {
            kind: FailureKind::CancelTimeout,
            message: "cancel request not honored within grace period".to_string(),
        }
    }

    pub fn worker_shutdown(worker: impl fmt::Display) -> Self {
        Self {
            kind: FailureKind::WorkerShutdown,
            message: format!("worker {worker} shut down mid-task"),
        }
    }
}
