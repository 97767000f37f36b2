//! In-memory task store implementation.
//!
//! The reference implementation of [`TaskStore`]. One async mutex guards the
//! whole state: every trait method takes the lock, makes its decision, and
//! releases it before returning. That lock is the store-level
//! mutual-exclusion primitive the claim protocol requires — scoped to a
//! single decision, never held across a task's execution. A SQL-backed
//! implementation would use an advisory lock or row locks with the same
//! scope.
//!
//! 重要: ロックを跨いで await しない。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::app::status::TaskCounts;
use crate::domain::{
    CancelOutcome, CuratorError, LockMode, Reservation, ResourceKey, TaskFailure, TaskId,
    TaskRecord, TaskSpec, TaskState, TerminalOutcome, WorkerId, WorkerRecord,
};
use crate::ports::{
    ClaimedTask, Clock, HeartbeatView, IdGenerator, SweptWorker, SystemClock, TaskFilter,
    TaskStore, UlidGenerator,
};

/// Mutable store state, guarded by one mutex.
struct StoreState {
    /// All task records (single source of truth for tasks).
    records: HashMap<TaskId, TaskRecord>,

    /// Creation order. ULIDs sort by time but collide within a millisecond,
    /// so insertion order is the authoritative FIFO for the claim scan.
    order: Vec<TaskId>,

    /// Reservation ledger: task -> declared/held reservations.
    reservations: HashMap<TaskId, Vec<Reservation>>,

    /// Worker liveness records.
    workers: HashMap<WorkerId, WorkerRecord>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            reservations: HashMap::new(),
            workers: HashMap::new(),
        }
    }

    /// Reservations currently held (owning task is Running/Canceling),
    /// grouped by key.
    fn held_by_key(&self) -> HashMap<&ResourceKey, Vec<LockMode>> {
        let mut held: HashMap<&ResourceKey, Vec<LockMode>> = HashMap::new();
        for (task_id, reservations) in &self.reservations {
            let Some(record) = self.records.get(task_id) else {
                continue;
            };
            if !record.state.is_active() {
                continue;
            }
            for r in reservations {
                held.entry(&r.key).or_default().push(r.mode);
            }
        }
        held
    }

    /// The claim scan (§ claim protocol): oldest Waiting task whose declared
    /// set conflicts neither with held reservations nor with the barrier of
    /// earlier-skipped Waiting tasks.
    fn find_claimable(&self) -> Option<TaskId> {
        let held = self.held_by_key();
        let mut barrier: HashSet<&ResourceKey> = HashSet::new();

        for task_id in &self.order {
            let Some(record) = self.records.get(task_id) else {
                continue;
            };
            if !record.state.is_claimable() {
                continue;
            }

            let declared = self
                .reservations
                .get(task_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let behind_barrier = declared.iter().any(|r| barrier.contains(&r.key));
            let conflicts = declared.iter().any(|r| {
                held.get(&r.key)
                    .is_some_and(|modes| modes.iter().any(|held| r.mode.conflicts_with(*held)))
            });

            if !behind_barrier && !conflicts {
                return Some(*task_id);
            }

            // A skipped waiting task shields every key it declares: newer
            // tasks overlapping any of those keys must wait behind it.
            for r in declared {
                barrier.insert(&r.key);
            }
        }
        None
    }

    /// Drop a task's reservations. Returns true if anything was released.
    fn release_reservations(&mut self, task_id: TaskId) -> bool {
        self.reservations
            .remove(&task_id)
            .is_some_and(|r| !r.is_empty())
    }

    /// Apply a terminal outcome. Caller has already checked the task exists
    /// and is not terminal.
    fn apply_terminal(&mut self, task_id: TaskId, outcome: TerminalOutcome, now: DateTime<Utc>) {
        let owner = self
            .records
            .get(&task_id)
            .and_then(|r| r.worker_id.clone());

        if let Some(record) = self.records.get_mut(&task_id) {
            match outcome {
                TerminalOutcome::Completed { result_refs } => {
                    record.finish_completed(result_refs, now)
                }
                TerminalOutcome::Failed { failure } => record.finish_failed(failure, now),
                TerminalOutcome::Canceled => record.finish_canceled(now),
            }
        }
        self.release_reservations(task_id);

        if let Some(worker_id) = owner
            && let Some(worker) = self.workers.get_mut(&worker_id)
            && worker.current_task_id == Some(task_id)
        {
            worker.current_task_id = None;
        }
    }

    fn counts_by_state(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for record in self.records.values() {
            match record.state {
                TaskState::Waiting => counts.waiting += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Canceling => counts.canceling += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
                TaskState::Canceled => counts.canceled += 1,
            }
        }
        counts
    }
}

/// In-memory [`TaskStore`].
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
            notify: Notify::new(),
            clock,
            ids,
        }
    }

    /// Wall clock + ULID generator, the production wiring.
    pub fn with_system_defaults() -> Self {
        Self::new(
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    /// Wake every dispatch loop parked in `await_activity`.
    ///
    /// Loops registered *after* this call miss the wake-up; the bounded
    /// timeout in `await_activity` covers that window.
    fn wake_dispatchers(&self) {
        self.notify.notify_waiters();
    }
}

/// Collapse duplicate keys in a declared resource set; Exclusive wins over
/// Shared on the same key.
fn normalize_resources(
    task_id: TaskId,
    declared: &[(ResourceKey, LockMode)],
) -> Vec<Reservation> {
    let mut by_key: HashMap<&ResourceKey, LockMode> = HashMap::new();
    for (key, mode) in declared {
        by_key
            .entry(key)
            .and_modify(|existing| {
                if *mode == LockMode::Exclusive {
                    *existing = LockMode::Exclusive;
                }
            })
            .or_insert(*mode);
    }
    by_key
        .into_iter()
        .map(|(key, mode)| Reservation {
            task_id,
            key: key.clone(),
            mode,
        })
        .collect()
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, spec: TaskSpec) -> Result<TaskId, CuratorError> {
        let task_id = self.ids.generate_task_id();
        let now = self.clock.now();

        {
            let mut state = self.state.lock().await;

            if let Some(parent) = spec.parent_id
                && !state.records.contains_key(&parent)
            {
                return Err(CuratorError::TaskNotFound(parent));
            }

            let reservations = normalize_resources(task_id, &spec.resources);
            let record = TaskRecord::new(task_id, &spec, now);

            state.order.push(task_id);
            state.records.insert(task_id, record);
            state.reservations.insert(task_id, reservations);
        }

        tracing::info!(task = %task_id, name = %spec.name, "task submitted");
        self.wake_dispatchers();
        Ok(task_id)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, CuratorError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, CuratorError> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn reservations_for(&self, id: TaskId) -> Result<Vec<Reservation>, CuratorError> {
        let state = self.state.lock().await;
        if !state.records.contains_key(&id) {
            return Err(CuratorError::TaskNotFound(id));
        }
        Ok(state.reservations.get(&id).cloned().unwrap_or_default())
    }

    async fn cancel_task(&self, id: TaskId) -> Result<CancelOutcome, CuratorError> {
        let outcome = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();

            let Some(record) = state.records.get_mut(&id) else {
                return Err(CuratorError::TaskNotFound(id));
            };

            match record.state {
                TaskState::Waiting => {
                    record.finish_canceled(now);
                    state.release_reservations(id);
                    CancelOutcome::Canceled
                }
                TaskState::Running => {
                    record.request_cancel();
                    CancelOutcome::Canceling
                }
                // Repeated cancel of a Canceling task: same answer, no-op.
                TaskState::Canceling => CancelOutcome::Canceling,
                _ => CancelOutcome::AlreadyFinished,
            }
        };

        if outcome == CancelOutcome::Canceled {
            // A canceled Waiting task no longer shields its keys; newer
            // overlapping tasks may have become claimable.
            tracing::info!(task = %id, "waiting task canceled");
            self.wake_dispatchers();
        }
        Ok(outcome)
    }

    async fn finish_task(
        &self,
        id: TaskId,
        outcome: TerminalOutcome,
    ) -> Result<bool, CuratorError> {
        {
            let mut state = self.state.lock().await;
            let now = self.clock.now();

            let Some(record) = state.records.get(&id) else {
                return Err(CuratorError::TaskNotFound(id));
            };
            // Monotonicity guard: a worker reporting after the sweeper (or a
            // second finish of any kind) must not overwrite the terminal
            // state.
            if record.state.is_terminal() {
                return Ok(false);
            }

            // A completion can race a cancel request: the body returns just
            // before its worker observes the flag. Canceling never leads to
            // Completed, so the late result is recorded as Canceled.
            let outcome = match outcome {
                TerminalOutcome::Completed { .. } if record.state == TaskState::Canceling => {
                    TerminalOutcome::Canceled
                }
                other => other,
            };

            state.apply_terminal(id, outcome, now);
        }

        self.wake_dispatchers();
        Ok(true)
    }

    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<ClaimedTask>, CuratorError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let Some(worker_record) = state.workers.get(worker) else {
            return Err(CuratorError::UnknownWorker(worker.to_string()));
        };
        if let Some(owned) = worker_record.current_task_id {
            return Err(CuratorError::Other(format!(
                "worker {worker} already owns task {owned}"
            )));
        }

        let Some(task_id) = state.find_claimable() else {
            return Ok(None);
        };

        // Claim decision and Running transition are one atomic step: the
        // mutex is still held.
        let claimed = {
            let record = state
                .records
                .get_mut(&task_id)
                .ok_or(CuratorError::TaskNotFound(task_id))?;
            record.start(worker.clone(), now);
            ClaimedTask {
                task_id,
                name: record.name.clone(),
                payload: record.payload.clone(),
            }
        };
        if let Some(worker_record) = state.workers.get_mut(worker) {
            worker_record.current_task_id = Some(task_id);
        }

        tracing::info!(task = %task_id, worker = %worker, "task claimed");
        Ok(Some(claimed))
    }

    async fn await_activity(&self, max_wait: Duration) {
        let notified = self.notify.notified();
        // Bounded wait: notification loss only costs one `max_wait` sleep.
        let _ = tokio::time::timeout(max_wait, notified).await;
    }

    async fn register_worker(&self, worker: &WorkerId) -> Result<(), CuratorError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        state
            .workers
            .entry(worker.clone())
            .and_modify(|w| w.last_heartbeat = now)
            .or_insert_with(|| WorkerRecord::new(worker.clone(), now));
        Ok(())
    }

    async fn heartbeat(&self, worker: &WorkerId) -> Result<HeartbeatView, CuratorError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let Some(worker_record) = state.workers.get_mut(worker) else {
            return Err(CuratorError::UnknownWorker(worker.to_string()));
        };
        worker_record.last_heartbeat = now;
        let current = worker_record.current_task_id;

        let cancel_requested = current
            .and_then(|id| state.records.get(&id))
            .is_some_and(|r| r.state == TaskState::Canceling);

        Ok(HeartbeatView { cancel_requested })
    }

    async fn deregister_worker(&self, worker: &WorkerId) -> Result<(), CuratorError> {
        let orphaned_task = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();

            let Some(worker_record) = state.workers.remove(worker) else {
                return Ok(());
            };

            let owned = worker_record.current_task_id.filter(|id| {
                state
                    .records
                    .get(id)
                    .is_some_and(|r| r.state.is_active())
            });
            if let Some(task_id) = owned {
                state.apply_terminal(
                    task_id,
                    TerminalOutcome::Failed {
                        failure: TaskFailure::worker_shutdown(worker),
                    },
                    now,
                );
            }
            owned
        };

        if let Some(task_id) = orphaned_task {
            tracing::warn!(worker = %worker, task = %task_id, "worker deregistered mid-task; task failed");
            self.wake_dispatchers();
        }
        Ok(())
    }

    async fn sweep_expired_workers(
        &self,
        ttl: Duration,
    ) -> Result<Vec<SweptWorker>, CuratorError> {
        let swept = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();

            let expired: Vec<WorkerId> = state
                .workers
                .values()
                .filter(|w| w.is_expired(ttl, now))
                .map(|w| w.id.clone())
                .collect();

            let mut swept = Vec::with_capacity(expired.len());
            for worker_id in expired {
                let Some(worker_record) = state.workers.remove(&worker_id) else {
                    continue;
                };
                let owned = worker_record.current_task_id.filter(|id| {
                    state
                        .records
                        .get(id)
                        .is_some_and(|r| r.state.is_active() && r.worker_id.as_ref() == Some(&worker_id))
                });
                if let Some(task_id) = owned {
                    state.apply_terminal(
                        task_id,
                        TerminalOutcome::Failed {
                            failure: TaskFailure::worker_lost(&worker_id),
                        },
                        now,
                    );
                }
                swept.push(SweptWorker {
                    worker_id,
                    task_id: owned,
                });
            }
            swept
        };

        if !swept.is_empty() {
            for s in &swept {
                tracing::warn!(worker = %s.worker_id, task = ?s.task_id.map(|t| t.to_string()), "dead worker reclaimed");
            }
            self.wake_dispatchers();
        }
        Ok(swept)
    }

    async fn purge_tasks(
        &self,
        older_than: DateTime<Utc>,
        batch: usize,
    ) -> Result<u64, CuratorError> {
        let batch = batch.max(1);
        let mut deleted: u64 = 0;

        // Each batch is its own lock acquisition, so a large purge never
        // blocks claims for long.
        loop {
            let removed = {
                let mut state = self.state.lock().await;
                let victims: Vec<TaskId> = state
                    .order
                    .iter()
                    .filter(|id| {
                        state.records.get(id).is_some_and(|r| {
                            r.state.is_terminal()
                                && r.finished_at.is_some_and(|t| t < older_than)
                        })
                    })
                    .take(batch)
                    .copied()
                    .collect();

                for id in &victims {
                    state.records.remove(id);
                    state.reservations.remove(id);
                }
                if !victims.is_empty() {
                    let gone: HashSet<TaskId> = victims.iter().copied().collect();
                    state.order.retain(|id| !gone.contains(id));
                }
                victims.len()
            };

            deleted += removed as u64;
            if removed < batch {
                break;
            }
            tokio::task::yield_now().await;
        }

        if deleted > 0 {
            tracing::info!(deleted, "purged terminal tasks");
        }
        Ok(deleted)
    }

    async fn stale_workers(&self, ttl: Duration) -> Result<Vec<WorkerRecord>, CuratorError> {
        let state = self.state.lock().await;
        let now = self.clock.now();
        Ok(state
            .workers
            .values()
            .filter(|w| w.is_expired(ttl, now))
            .cloned()
            .collect())
    }

    async fn orphaned_reservations(&self) -> Result<Vec<Reservation>, CuratorError> {
        let state = self.state.lock().await;
        let mut orphans = Vec::new();
        for (task_id, reservations) in &state.reservations {
            let alive = state
                .records
                .get(task_id)
                .is_some_and(|r| !r.state.is_terminal());
            if !alive {
                orphans.extend(reservations.iter().cloned());
            }
        }
        Ok(orphans)
    }

    async fn force_release(
        &self,
        task_id: TaskId,
        key: &ResourceKey,
    ) -> Result<bool, CuratorError> {
        let removed = {
            let mut state = self.state.lock().await;
            match state.reservations.get_mut(&task_id) {
                Some(reservations) => {
                    let before = reservations.len();
                    reservations.retain(|r| &r.key != key);
                    before != reservations.len()
                }
                None => false,
            }
        };

        if removed {
            tracing::warn!(task = %task_id, key = %key, "reservation force-released");
            self.wake_dispatchers();
        }
        Ok(removed)
    }

    async fn counts_by_state(&self) -> Result<TaskCounts, CuratorError> {
        let state = self.state.lock().await;
        Ok(state.counts_by_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;

    fn store() -> InMemoryTaskStore {
        InMemoryTaskStore::with_system_defaults()
    }

    fn worker(n: u32) -> WorkerId {
        WorkerId::new("test-host", n)
    }

    fn sync_spec(repo: &str, mode: LockMode) -> TaskSpec {
        TaskSpec::new("repository.sync", serde_json::json!({ "repo": repo }))
            .with_resource(format!("repository:{repo}"), mode)
    }

    async fn registered(store: &InMemoryTaskStore, n: u32) -> WorkerId {
        let w = worker(n);
        store.register_worker(&w).await.unwrap();
        w
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = store();
        let id = store
            .create_task(sync_spec("r1", LockMode::Exclusive))
            .await
            .unwrap();

        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Waiting);
        assert_eq!(record.name.as_str(), "repository.sync");
        assert!(record.worker_id.is_none());

        let reservations = store.reservations_for(id).await.unwrap();
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].mode, LockMode::Exclusive);
    }

    #[tokio::test]
    async fn parent_must_already_exist() {
        let store = store();
        let bogus = TaskId::from_ulid(ulid::Ulid::new());
        let spec = TaskSpec::new("child", serde_json::json!({})).with_parent(bogus);
        assert!(matches!(
            store.create_task(spec).await,
            Err(CuratorError::TaskNotFound(_))
        ));

        let parent = store
            .create_task(TaskSpec::new("parent", serde_json::json!({})))
            .await
            .unwrap();
        let child = store
            .create_task(TaskSpec::new("child", serde_json::json!({})).with_parent(parent))
            .await
            .unwrap();

        let filter = TaskFilter {
            parent_id: Some(parent),
            ..TaskFilter::default()
        };
        let children = store.list_tasks(&filter).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child);
    }

    #[tokio::test]
    async fn duplicate_keys_collapse_to_exclusive() {
        let store = store();
        let spec = TaskSpec::new("t", serde_json::json!({}))
            .with_resource("k", LockMode::Shared)
            .with_resource("k", LockMode::Exclusive);
        let id = store.create_task(spec).await.unwrap();

        let reservations = store.reservations_for(id).await.unwrap();
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].mode, LockMode::Exclusive);
    }

    #[tokio::test]
    async fn claim_requires_registered_worker() {
        let store = store();
        store
            .create_task(TaskSpec::new("t", serde_json::json!({})))
            .await
            .unwrap();
        let result = store.claim_next(&worker(1)).await;
        assert!(matches!(result, Err(CuratorError::UnknownWorker(_))));
    }

    #[tokio::test]
    async fn claims_go_oldest_first() {
        let store = store();
        let first = store
            .create_task(TaskSpec::new("a", serde_json::json!({})))
            .await
            .unwrap();
        let second = store
            .create_task(TaskSpec::new("b", serde_json::json!({})))
            .await
            .unwrap();

        let w1 = registered(&store, 1).await;
        let w2 = registered(&store, 2).await;

        let c1 = store.claim_next(&w1).await.unwrap().unwrap();
        let c2 = store.claim_next(&w2).await.unwrap().unwrap();
        assert_eq!(c1.task_id, first);
        assert_eq!(c2.task_id, second);
    }

    #[tokio::test]
    async fn exclusive_serializes_same_resource() {
        // Scenario A at the store level: T2 cannot start before T1 ends.
        let store = store();
        let t1 = store
            .create_task(sync_spec("repo-1", LockMode::Exclusive))
            .await
            .unwrap();
        let t2 = store
            .create_task(sync_spec("repo-1", LockMode::Exclusive))
            .await
            .unwrap();

        let w1 = registered(&store, 1).await;
        let w2 = registered(&store, 2).await;

        assert_eq!(store.claim_next(&w1).await.unwrap().unwrap().task_id, t1);
        // Conflicting reservation held: nothing claimable for w2.
        assert!(store.claim_next(&w2).await.unwrap().is_none());

        store
            .finish_task(
                t1,
                TerminalOutcome::Completed {
                    result_refs: vec![],
                },
            )
            .await
            .unwrap();

        assert_eq!(store.claim_next(&w2).await.unwrap().unwrap().task_id, t2);
    }

    #[tokio::test]
    async fn shared_reservations_coexist() {
        let store = store();
        store
            .create_task(sync_spec("repo-1", LockMode::Shared))
            .await
            .unwrap();
        store
            .create_task(sync_spec("repo-1", LockMode::Shared))
            .await
            .unwrap();

        let w1 = registered(&store, 1).await;
        let w2 = registered(&store, 2).await;

        assert!(store.claim_next(&w1).await.unwrap().is_some());
        assert!(store.claim_next(&w2).await.unwrap().is_some());

        let counts = store.counts_by_state().await.unwrap();
        assert_eq!(counts.running, 2);
    }

    #[tokio::test]
    async fn disjoint_resources_run_concurrently() {
        // Scenario B: repo-1 and repo-2 do not contend.
        let store = store();
        store
            .create_task(sync_spec("repo-1", LockMode::Exclusive))
            .await
            .unwrap();
        store
            .create_task(sync_spec("repo-2", LockMode::Exclusive))
            .await
            .unwrap();

        let w1 = registered(&store, 1).await;
        let w2 = registered(&store, 2).await;

        assert!(store.claim_next(&w1).await.unwrap().is_some());
        assert!(store.claim_next(&w2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fifo_barrier_prevents_starvation() {
        let store = store();
        // T1 runs holding a Shared reservation on the key.
        let _t1 = store
            .create_task(sync_spec("repo-1", LockMode::Shared))
            .await
            .unwrap();
        let w1 = registered(&store, 1).await;
        store.claim_next(&w1).await.unwrap().unwrap();

        // T2 wants Exclusive: blocked by the held Shared reservation.
        let t2 = store
            .create_task(sync_spec("repo-1", LockMode::Exclusive))
            .await
            .unwrap();
        // T3 wants Shared: compatible with the held reservation, but it must
        // wait behind T2 — otherwise a stream of Shared tasks starves T2.
        let _t3 = store
            .create_task(sync_spec("repo-1", LockMode::Shared))
            .await
            .unwrap();

        let w2 = registered(&store, 2).await;
        assert!(store.claim_next(&w2).await.unwrap().is_none());

        // T1 finishes; the oldest waiter (T2) goes first.
        let t1_id = store
            .list_tasks(&TaskFilter {
                state: Some(TaskState::Running),
                ..TaskFilter::default()
            })
            .await
            .unwrap()[0]
            .id;
        store
            .finish_task(
                t1_id,
                TerminalOutcome::Completed {
                    result_refs: vec![],
                },
            )
            .await
            .unwrap();

        assert_eq!(store.claim_next(&w2).await.unwrap().unwrap().task_id, t2);
    }

    #[tokio::test]
    async fn barrier_does_not_block_disjoint_tasks() {
        let store = store();
        let w1 = registered(&store, 1).await;
        store
            .create_task(sync_spec("repo-1", LockMode::Exclusive))
            .await
            .unwrap();
        store.claim_next(&w1).await.unwrap().unwrap();

        // Blocked waiter on repo-1 shields repo-1 only.
        store
            .create_task(sync_spec("repo-1", LockMode::Exclusive))
            .await
            .unwrap();
        let unrelated = store
            .create_task(sync_spec("repo-2", LockMode::Exclusive))
            .await
            .unwrap();

        let w2 = registered(&store, 2).await;
        assert_eq!(
            store.claim_next(&w2).await.unwrap().unwrap().task_id,
            unrelated
        );
    }

    #[tokio::test]
    async fn cancel_waiting_is_synchronous_and_idempotent() {
        let store = store();
        let id = store
            .create_task(sync_spec("r1", LockMode::Exclusive))
            .await
            .unwrap();

        assert_eq!(
            store.cancel_task(id).await.unwrap(),
            CancelOutcome::Canceled
        );
        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Canceled);
        assert!(record.finished_at.is_some());
        assert!(store.reservations_for(id).await.unwrap().is_empty());

        // Second cancel: no error, no different outcome class.
        assert_eq!(
            store.cancel_task(id).await.unwrap(),
            CancelOutcome::AlreadyFinished
        );
        assert_eq!(
            store.get_task(id).await.unwrap().unwrap().state,
            TaskState::Canceled
        );
    }

    #[tokio::test]
    async fn cancel_running_flags_the_owner() {
        let store = store();
        let id = store
            .create_task(sync_spec("r1", LockMode::Exclusive))
            .await
            .unwrap();
        let w = registered(&store, 1).await;
        store.claim_next(&w).await.unwrap().unwrap();

        assert_eq!(
            store.cancel_task(id).await.unwrap(),
            CancelOutcome::Canceling
        );
        assert_eq!(
            store.get_task(id).await.unwrap().unwrap().state,
            TaskState::Canceling
        );
        // The owner learns about it through its heartbeat.
        assert!(store.heartbeat(&w).await.unwrap().cancel_requested);

        // Idempotent while Canceling too.
        assert_eq!(
            store.cancel_task(id).await.unwrap(),
            CancelOutcome::Canceling
        );
    }

    #[tokio::test]
    async fn finish_is_guarded_against_regressions() {
        let store = store();
        let id = store
            .create_task(TaskSpec::new("t", serde_json::json!({})))
            .await
            .unwrap();
        let w = registered(&store, 1).await;
        store.claim_next(&w).await.unwrap().unwrap();

        assert!(
            store
                .finish_task(
                    id,
                    TerminalOutcome::Completed {
                        result_refs: vec!["ref-1".into()]
                    }
                )
                .await
                .unwrap()
        );

        // A late, conflicting report must be a no-op.
        let applied = store
            .finish_task(
                id,
                TerminalOutcome::Failed {
                    failure: TaskFailure::body("late"),
                },
            )
            .await
            .unwrap();
        assert!(!applied);
        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.result_refs, vec!["ref-1".to_string()]);
    }

    #[tokio::test]
    async fn completion_racing_a_cancel_is_recorded_canceled() {
        let store = store();
        let id = store
            .create_task(TaskSpec::new("t", serde_json::json!({})))
            .await
            .unwrap();
        let w = registered(&store, 1).await;
        store.claim_next(&w).await.unwrap().unwrap();
        store.cancel_task(id).await.unwrap();

        // The body finished before its worker saw the cancel flag.
        let applied = store
            .finish_task(id, TerminalOutcome::Completed { result_refs: vec![] })
            .await
            .unwrap();
        assert!(applied);
        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn one_task_per_worker() {
        let store = store();
        store
            .create_task(TaskSpec::new("a", serde_json::json!({})))
            .await
            .unwrap();
        store
            .create_task(TaskSpec::new("b", serde_json::json!({})))
            .await
            .unwrap();

        let w = registered(&store, 1).await;
        store.claim_next(&w).await.unwrap().unwrap();
        assert!(store.claim_next(&w).await.is_err());
    }

    #[tokio::test]
    async fn sweep_reclaims_dead_worker() {
        // Scenario C at the store level.
        let store = store();
        let id = store
            .create_task(sync_spec("r1", LockMode::Exclusive))
            .await
            .unwrap();
        let dead = registered(&store, 1).await;
        store.claim_next(&dead).await.unwrap().unwrap();

        // Let the heartbeat age past a zero TTL.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let swept = store
            .sweep_expired_workers(Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].worker_id, dead);
        assert_eq!(swept[0].task_id, Some(id));

        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.error.as_ref().unwrap().kind, FailureKind::WorkerLost);
        assert!(store.reservations_for(id).await.unwrap().is_empty());

        // Sweeping again has no additional effect.
        let again = store
            .sweep_expired_workers(Duration::ZERO)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn sweep_spares_live_workers() {
        let store = store();
        let _live = registered(&store, 1).await;
        let swept = store
            .sweep_expired_workers(Duration::from_secs(60))
            .await
            .unwrap();
        assert!(swept.is_empty());
    }

    #[tokio::test]
    async fn released_resources_unblock_waiters_after_sweep() {
        let store = store();
        store
            .create_task(sync_spec("r1", LockMode::Exclusive))
            .await
            .unwrap();
        let blocked = store
            .create_task(sync_spec("r1", LockMode::Exclusive))
            .await
            .unwrap();

        let dead = registered(&store, 1).await;
        store.claim_next(&dead).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .sweep_expired_workers(Duration::ZERO)
            .await
            .unwrap();

        let w2 = registered(&store, 2).await;
        assert_eq!(
            store.claim_next(&w2).await.unwrap().unwrap().task_id,
            blocked
        );
    }

    #[tokio::test]
    async fn deregister_mid_task_fails_the_task() {
        let store = store();
        let id = store
            .create_task(TaskSpec::new("t", serde_json::json!({})))
            .await
            .unwrap();
        let w = registered(&store, 1).await;
        store.claim_next(&w).await.unwrap().unwrap();

        store.deregister_worker(&w).await.unwrap();
        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(
            record.error.as_ref().unwrap().kind,
            FailureKind::WorkerShutdown
        );

        // Deregistering an unknown worker is a no-op.
        store.deregister_worker(&w).await.unwrap();
    }

    #[tokio::test]
    async fn purge_deletes_terminal_tasks_in_batches() {
        let store = store();
        let w = registered(&store, 1).await;

        for _ in 0..5 {
            let id = store
                .create_task(TaskSpec::new("t", serde_json::json!({})))
                .await
                .unwrap();
            store.claim_next(&w).await.unwrap().unwrap();
            store
                .finish_task(
                    id,
                    TerminalOutcome::Completed {
                        result_refs: vec![],
                    },
                )
                .await
                .unwrap();
        }
        let survivor = store
            .create_task(TaskSpec::new("still-waiting", serde_json::json!({})))
            .await
            .unwrap();

        let deleted = store
            .purge_tasks(Utc::now() + chrono::Duration::hours(1), 2)
            .await
            .unwrap();
        assert_eq!(deleted, 5);
        assert!(store.get_task(survivor).await.unwrap().is_some());
        assert_eq!(store.counts_by_state().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn purge_respects_the_cutoff() {
        let store = store();
        let w = registered(&store, 1).await;
        let id = store
            .create_task(TaskSpec::new("t", serde_json::json!({})))
            .await
            .unwrap();
        store.claim_next(&w).await.unwrap().unwrap();
        store
            .finish_task(
                id,
                TerminalOutcome::Completed {
                    result_refs: vec![],
                },
            )
            .await
            .unwrap();

        // Cutoff in the past: nothing qualifies.
        let deleted = store
            .purge_tasks(Utc::now() - chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert!(store.get_task(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn healthy_store_has_no_orphans_and_force_release_unblocks() {
        let store = store();
        assert!(store.orphaned_reservations().await.unwrap().is_empty());

        let stuck = store
            .create_task(sync_spec("r1", LockMode::Exclusive))
            .await
            .unwrap();
        let blocked = store
            .create_task(sync_spec("r1", LockMode::Exclusive))
            .await
            .unwrap();
        let w1 = registered(&store, 1).await;
        store.claim_next(&w1).await.unwrap().unwrap();

        let w2 = registered(&store, 2).await;
        assert!(store.claim_next(&w2).await.unwrap().is_none());

        // Operator breaks the tie by force-releasing the held reservation.
        let key = ResourceKey::new("repository:r1");
        assert!(store.force_release(stuck, &key).await.unwrap());
        assert!(!store.force_release(stuck, &key).await.unwrap());

        assert_eq!(
            store.claim_next(&w2).await.unwrap().unwrap().task_id,
            blocked
        );
    }

    #[tokio::test]
    async fn stale_workers_are_visible_before_sweep() {
        let store = store();
        let w = registered(&store, 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stale = store.stale_workers(Duration::ZERO).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, w);

        // Still registered: the debug view does not sweep.
        assert!(store.heartbeat(&w).await.is_ok());
    }

    #[tokio::test]
    async fn await_activity_wakes_on_submission() {
        let store = Arc::new(store());
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let start = std::time::Instant::now();
                store.await_activity(Duration::from_secs(5)).await;
                start.elapsed()
            })
        };

        // Give the waiter time to park.
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .create_task(TaskSpec::new("wake", serde_json::json!({})))
            .await
            .unwrap();

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    }
}
