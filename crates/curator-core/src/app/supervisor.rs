//! Execution supervisor: runs one claimed task body and shepherds it to a
//! terminal state.
//!
//! フロー:
//! 1. name から handler を解決（見つからなければ body failure）
//! 2. body を spawn、heartbeat を刻みながら完了を待つ
//! 3. heartbeat が cancel を報告したら token を倒し、grace 期間だけ待つ
//! 4. terminal outcome をストアに記録（予約解放と同一アトミックステップ）
//!
//! The body is opaque: the supervisor only observes its return value, the
//! cancel flag, and time.

use std::sync::Arc;

use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::domain::{CuratorError, TaskFailure, TaskOutcome, TerminalOutcome, WorkerId};
use crate::ports::{ClaimedTask, TaskStore};
use crate::typed::{HandlerRegistry, TaskContext};

type BodyResult = Result<Result<TaskOutcome, CuratorError>, JoinError>;

pub struct Supervisor {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    config: SchedulerConfig,
    worker_id: WorkerId,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        config: SchedulerConfig,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            worker_id,
        }
    }

    /// Run one claimed task to a terminal state. Never propagates body
    /// errors: whatever happens inside the body ends up as a recorded
    /// outcome, not a worker crash.
    pub async fn run(&self, claimed: ClaimedTask) {
        let task_id = claimed.task_id;

        let Some(handler) = self.registry.get(claimed.name.as_str()) else {
            let failure =
                TaskFailure::body(format!("no handler registered for '{}'", claimed.name));
            self.record(task_id, TerminalOutcome::Failed { failure }).await;
            return;
        };

        let cancel = CancellationToken::new();
        let ctx = TaskContext::new(task_id, cancel.clone(), Arc::clone(&self.store));
        let payload = claimed.payload;
        let mut body = tokio::spawn(async move { handler.handle_dyn(payload, ctx).await });

        let mut ticks = tokio::time::interval(self.config.heartbeat_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Phase 1: run until the body returns or a cancel request arrives.
        let early_result: Option<BodyResult> = loop {
            tokio::select! {
                res = &mut body => break Some(res),
                _ = ticks.tick() => {
                    match self.store.heartbeat(&self.worker_id).await {
                        Ok(view) if view.cancel_requested => {
                            cancel.cancel();
                            break None;
                        }
                        Ok(_) => {}
                        // Transient store fault: do not kill a healthy body
                        // over it, just retry on the next tick.
                        Err(e) => {
                            tracing::warn!(worker = %self.worker_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        };

        let outcome = match early_result {
            Some(res) => outcome_from_body(res, false),
            None => {
                // Phase 2: the body was asked to stop; give it the grace
                // period while heartbeats keep flowing.
                let grace = tokio::time::sleep(self.config.cancel_grace);
                tokio::pin!(grace);
                loop {
                    tokio::select! {
                        res = &mut body => break outcome_from_body(res, true),
                        _ = &mut grace => {
                            body.abort();
                            // Anomaly, not business as usual.
                            tracing::warn!(
                                task = %task_id,
                                grace = ?self.config.cancel_grace,
                                "cancel not honored within grace period; body terminated forcefully"
                            );
                            break TerminalOutcome::Failed {
                                failure: TaskFailure::cancel_timeout(),
                            };
                        }
                        _ = ticks.tick() => {
                            if let Err(e) = self.store.heartbeat(&self.worker_id).await {
                                tracing::warn!(worker = %self.worker_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                }
            }
        };

        self.record(task_id, outcome).await;
    }

    async fn record(&self, task_id: crate::domain::TaskId, outcome: TerminalOutcome) {
        match self.store.finish_task(task_id, outcome).await {
            Ok(true) => tracing::info!(task = %task_id, worker = %self.worker_id, "task finished"),
            // Someone beat us to it (sweeper, most likely). Their verdict
            // stands.
            Ok(false) => {
                tracing::warn!(task = %task_id, "task already terminal; outcome dropped")
            }
            Err(e) => {
                tracing::warn!(task = %task_id, error = %e, "failed to record task outcome")
            }
        }
    }
}

/// Map a body result to a terminal outcome.
///
/// Deterministic cancellation boundary: any body return *after* the cancel
/// token was tripped counts as a cooperative stop and records Canceled;
/// only a forced abort after the grace period records Failed.
fn outcome_from_body(res: BodyResult, canceling: bool) -> TerminalOutcome {
    match res {
        Ok(_) if canceling => TerminalOutcome::Canceled,
        Ok(Ok(TaskOutcome::Success { result_refs })) => TerminalOutcome::Completed { result_refs },
        Ok(Ok(TaskOutcome::Canceled)) => TerminalOutcome::Canceled,
        Ok(Err(e)) => TerminalOutcome::Failed {
            failure: TaskFailure::body(e.to_string()),
        },
        Err(join_err) => TerminalOutcome::Failed {
            failure: TaskFailure::body(format!("task body panicked: {join_err}")),
        },
    }
}
