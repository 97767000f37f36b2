//! TaskStore port - the shared transactional store every worker coordinates
//! through.
//!
//! TaskStore は以下を管理します：
//! - タスク（state machine, timestamps, failure record）
//! - リソース予約（reservation ledger）
//! - ワーカー（heartbeat / liveness records）
//!
//! # 設計原則
//! - The store is the source of truth; no process holds authoritative
//!   in-memory state about other processes.
//! - Every method is one short-lived, store-level transaction scoped to a
//!   single decision (claim, release, heartbeat, sweep). No transaction ever
//!   spans the lifetime of a running task.
//! - Partial writes (task updated but reservation not released, or vice
//!   versa) must not be observable from any other method.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    CancelOutcome, CuratorError, Reservation, TaskId, TaskName, TaskRecord, TaskSpec, TaskState,
    TerminalOutcome, WorkerId, WorkerRecord,
};

/// Filter for `list_tasks`. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub name: Option<TaskName>,
    pub created_after: Option<DateTime<Utc>>,
    pub parent_id: Option<TaskId>,
}

impl TaskFilter {
    pub fn matches(&self, record: &TaskRecord) -> bool {
        if let Some(state) = self.state
            && record.state != state
        {
            return false;
        }
        if let Some(name) = &self.name
            && &record.name != name
        {
            return false;
        }
        if let Some(after) = self.created_after
            && record.created_at <= after
        {
            return false;
        }
        if let Some(parent) = self.parent_id
            && record.parent_id != Some(parent)
        {
            return false;
        }
        true
    }
}

/// What a successful claim hands to the execution supervisor.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task_id: TaskId,
    pub name: TaskName,
    pub payload: serde_json::Value,
}

/// Result of one heartbeat round-trip.
///
/// Persisting the heartbeat and reading the cancel flag are combined into
/// one call so a running worker needs exactly one store round-trip per tick.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatView {
    /// The worker's current task moved to Canceling; the body should be
    /// asked to stop.
    pub cancel_requested: bool,
}

/// One dead worker reclaimed by a sweep.
#[derive(Debug, Clone)]
pub struct SweptWorker {
    pub worker_id: WorkerId,
    /// The task that was forcibly failed, if the worker owned one.
    pub task_id: Option<TaskId>,
}

/// The shared task store.
///
/// 実装側の責務: 各メソッドはアトミック（他の claim と競合しても
/// 部分的な書き込みが見えない）。In-memory 実装は単一の async mutex で
/// これをモデル化する。PostgreSQL 実装なら advisory lock / row lock の
/// スコープに相当する。
#[async_trait]
pub trait TaskStore: Send + Sync {
    // ── Task lifecycle ────────────────────────────────────────────────

    /// Insert a Waiting task plus its declared reservations in one atomic
    /// operation. Returns immediately; execution happens elsewhere.
    ///
    /// Errors with `TaskNotFound` if `spec.parent_id` references an unknown
    /// task (a parent must exist before its children).
    async fn create_task(&self, spec: TaskSpec) -> Result<TaskId, CuratorError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, CuratorError>;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, CuratorError>;

    /// The resolved reservation set a task declares/holds.
    async fn reservations_for(&self, id: TaskId) -> Result<Vec<Reservation>, CuratorError>;

    /// Cancel a task. Waiting tasks become Canceled synchronously (with
    /// zero reservations left); Running tasks move to Canceling and the
    /// owning worker observes the flag on its next heartbeat. Idempotent:
    /// canceling an already-terminal task is a no-op, not an error.
    async fn cancel_task(&self, id: TaskId) -> Result<CancelOutcome, CuratorError>;

    /// Record a terminal outcome and release all reservations in the same
    /// atomic step. Returns `false` (without writing anything) if the task
    /// is already terminal — a worker finishing a task the sweeper already
    /// reclaimed must not overwrite the sweeper's verdict.
    async fn finish_task(
        &self,
        id: TaskId,
        outcome: TerminalOutcome,
    ) -> Result<bool, CuratorError>;

    // ── Claim protocol ────────────────────────────────────────────────

    /// Atomically claim the oldest claimable Waiting task for `worker`.
    ///
    /// A task is claimable iff every declared `(key, mode)` is compatible
    /// with the reservations currently held by Running/Canceling tasks, and
    /// no earlier-created Waiting task declares an overlapping resource set
    /// (strict FIFO per resource; prevents starvation by newer tasks).
    ///
    /// Returns `None` when nothing is claimable. Losing a race to another
    /// worker also shows up as `None`; callers just retry.
    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<ClaimedTask>, CuratorError>;

    /// Block until something that could change claimability happened (task
    /// submitted, reservation released), or `max_wait` elapsed. The bound
    /// guarantees notification loss cannot stall a dispatch loop.
    async fn await_activity(&self, max_wait: Duration);

    // ── Worker registry ───────────────────────────────────────────────

    /// Create or refresh a worker liveness record. Idempotent.
    async fn register_worker(&self, worker: &WorkerId) -> Result<(), CuratorError>;

    /// Refresh `last_heartbeat` and report whether the worker's current
    /// task has a pending cancel request.
    async fn heartbeat(&self, worker: &WorkerId) -> Result<HeartbeatView, CuratorError>;

    /// Remove a worker record on graceful shutdown. If the worker still
    /// owns a running task (abnormal: the dispatch loop normally drains its
    /// task first), that task is marked Failed with a worker-shutdown
    /// record — monotonicity forbids sending it back to Waiting.
    async fn deregister_worker(&self, worker: &WorkerId) -> Result<(), CuratorError>;

    // ── Liveness sweep ────────────────────────────────────────────────

    /// Reclaim every worker whose heartbeat is older than `ttl`: its owned
    /// task becomes Failed("worker lost"), the reservations are released,
    /// and the worker record is removed. Idempotent and safe to run
    /// concurrently from multiple processes — sweeping the same dead worker
    /// twice has no additional effect.
    async fn sweep_expired_workers(&self, ttl: Duration)
    -> Result<Vec<SweptWorker>, CuratorError>;

    // ── Maintenance / operational surface ─────────────────────────────

    /// Bulk-delete terminal tasks that finished before `older_than`,
    /// processed in batches of at most `batch` per transaction so a large
    /// purge never turns into one giant write. Returns the number deleted.
    async fn purge_tasks(
        &self,
        older_than: DateTime<Utc>,
        batch: usize,
    ) -> Result<u64, CuratorError>;

    /// Debug view: workers whose heartbeat is older than `ttl` but which
    /// have not been swept yet.
    async fn stale_workers(&self, ttl: Duration) -> Result<Vec<WorkerRecord>, CuratorError>;

    /// Debug view: reservations whose task is terminal or missing. A
    /// healthy store returns an empty list; anything here points at a bug
    /// or manual intervention gone wrong.
    async fn orphaned_reservations(&self) -> Result<Vec<Reservation>, CuratorError>;

    /// Administrative: force-release one reservation. Wakes dispatch loops
    /// so blocked tasks get re-evaluated.
    async fn force_release(
        &self,
        task_id: TaskId,
        key: &crate::domain::ResourceKey,
    ) -> Result<bool, CuratorError>;

    // ── Observability ─────────────────────────────────────────────────

    async fn counts_by_state(&self) -> Result<crate::app::status::TaskCounts, CuratorError>;
}
