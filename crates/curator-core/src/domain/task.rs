//! Task record: the durable row behind every unit of schedulable work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::TaskFailure;
use super::ids::TaskId;
use super::reservation::{LockMode, ResourceKey};
use super::state::TaskState;
use super::worker::WorkerId;

/// Identifies which handler/body a task runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Submission-time description of a task.
///
/// The payload is an opaque blob: the scheduler stores and forwards it but
/// never inspects its contents. The declared resource set is everything the
/// claim protocol needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: TaskName,
    pub payload: serde_json::Value,

    /// Resources this task must hold while it runs.
    #[serde(default)]
    pub resources: Vec<(ResourceKey, LockMode)>,

    /// Set when a running task spawns this task as a sub-task.
    #[serde(default)]
    pub parent_id: Option<TaskId>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: TaskName::new(name),
            payload,
            resources: Vec::new(),
            parent_id: None,
        }
    }

    pub fn with_resource(mut self, key: impl Into<String>, mode: LockMode) -> Self {
        self.resources.push((ResourceKey::new(key), mode));
        self
    }

    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

/// Durable record of one task.
///
/// Design:
/// - This is the single source of truth for task state.
/// - All state transitions happen through methods here, so the
///   monotonicity invariant lives in one place.
/// - Invariant: `worker_id` is non-null iff the task is Running/Canceling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: TaskName,
    pub payload: serde_json::Value,
    pub state: TaskState,

    pub parent_id: Option<TaskId>,

    /// Owning worker; set only while the task is Running/Canceling.
    pub worker_id: Option<WorkerId>,

    /// Structured failure record, set when state is Failed.
    pub error: Option<TaskFailure>,

    /// Opaque identifiers produced by the body, for external consumers.
    pub result_refs: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: TaskId, spec: &TaskSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            payload: spec.payload.clone(),
            state: TaskState::Waiting,
            parent_id: spec.parent_id,
            worker_id: None,
            error: None,
            result_refs: Vec::new(),
            created_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Waiting -> Running: claim by a worker.
    pub fn start(&mut self, worker: WorkerId, now: DateTime<Utc>) {
        debug_assert_eq!(self.state, TaskState::Waiting);
        self.state = TaskState::Running;
        self.worker_id = Some(worker);
        self.started_at = Some(now);
    }

    /// Running -> Canceling: a cancel request reached a running task.
    pub fn request_cancel(&mut self) {
        debug_assert_eq!(self.state, TaskState::Running);
        self.state = TaskState::Canceling;
    }

    /// -> Completed.
    pub fn finish_completed(&mut self, result_refs: Vec<String>, now: DateTime<Utc>) {
        debug_assert!(!self.state.is_terminal());
        self.state = TaskState::Completed;
        self.result_refs = result_refs;
        self.worker_id = None;
        self.finished_at = Some(now);
    }

    /// -> Failed with a structured failure record.
    pub fn finish_failed(&mut self, failure: TaskFailure, now: DateTime<Utc>) {
        debug_assert!(!self.state.is_terminal());
        self.state = TaskState::Failed;
        self.error = Some(failure);
        self.worker_id = None;
        self.finished_at = Some(now);
    }

    /// -> Canceled (never started, or stopped cooperatively).
    pub fn finish_canceled(&mut self, now: DateTime<Utc>) {
        debug_assert!(!self.state.is_terminal());
        self.state = TaskState::Canceled;
        self.worker_id = None;
        self.finished_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn record() -> TaskRecord {
        let spec = TaskSpec::new("repository.sync", serde_json::json!({"repo": "r1"}))
            .with_resource("repository:r1", LockMode::Exclusive);
        TaskRecord::new(TaskId::from_ulid(Ulid::new()), &spec, Utc::now())
    }

    #[test]
    fn new_record_is_waiting_without_owner() {
        let r = record();
        assert_eq!(r.state, TaskState::Waiting);
        assert!(r.worker_id.is_none());
        assert!(r.started_at.is_none());
        assert!(r.finished_at.is_none());
    }

    #[test]
    fn start_sets_owner_and_timestamp() {
        let mut r = record();
        let w = WorkerId::new("host", 42);
        r.start(w.clone(), Utc::now());

        assert_eq!(r.state, TaskState::Running);
        assert_eq!(r.worker_id.as_ref(), Some(&w));
        assert!(r.started_at.is_some());
    }

    #[test]
    fn finish_clears_owner() {
        let mut r = record();
        r.start(WorkerId::new("host", 42), Utc::now());
        r.finish_completed(vec!["pub-1".into()], Utc::now());

        assert_eq!(r.state, TaskState::Completed);
        assert!(r.worker_id.is_none());
        assert_eq!(r.result_refs, vec!["pub-1".to_string()]);
        assert!(r.finished_at.is_some());
    }

    #[test]
    fn failure_record_is_kept() {
        let mut r = record();
        r.start(WorkerId::new("host", 42), Utc::now());
        r.finish_failed(TaskFailure::body("boom"), Utc::now());

        assert_eq!(r.state, TaskState::Failed);
        assert_eq!(r.error.as_ref().unwrap().message, "boom");
    }

    #[test]
    fn cancel_path_goes_through_canceling() {
        let mut r = record();
        r.start(WorkerId::new("host", 42), Utc::now());
        r.request_cancel();
        assert_eq!(r.state, TaskState::Canceling);
        // Canceling still owns the worker: the body is executing.
        assert!(r.worker_id.is_some());

        r.finish_canceled(Utc::now());
        assert_eq!(r.state, TaskState::Canceled);
        assert!(r.worker_id.is_none());
    }
}
