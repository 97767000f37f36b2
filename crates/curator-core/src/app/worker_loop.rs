//! Worker group: N dispatch loops plus one liveness sweeper.
//!
//! - `shutdown_tx` を倒すとグループ全体が止まる
//! - `shutdown_and_join()` で全ループの終了を待てる
//!
//! Shutdown is graceful by default: each loop finishes its in-flight task
//! (supervision included) before deregistering. A worker that dies without
//! deregistering is reclaimed by the sweeper instead.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::supervisor::Supervisor;
use crate::app::sweeper_loop::sweeper_loop;
use crate::config::SchedulerConfig;
use crate::domain::WorkerId;
use crate::ports::TaskStore;
use crate::typed::HandlerRegistry;

pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` dispatch loops and the sweeper.
    pub fn spawn(
        n: usize,
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n + 1);
        for _ in 0..n {
            let worker_id = WorkerId::generate(&hostname());
            let s = Arc::clone(&store);
            let r = Arc::clone(&registry);
            let c = config.clone();
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                dispatch_loop(worker_id, s, r, c, &mut rx).await;
            }));
        }

        let s = Arc::clone(&store);
        let c = config.clone();
        let mut rx = shutdown_rx.clone();
        joins.push(tokio::spawn(async move {
            sweeper_loop(s, c, &mut rx).await;
        }));

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for the whole group. In-flight tasks run to
    /// completion; no new claims are made.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for every loop.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

async fn dispatch_loop(
    worker_id: WorkerId,
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    config: SchedulerConfig,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    // Registration may hit a transient store fault; retry until shutdown.
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        match store.register_worker(&worker_id).await {
            Ok(()) => break,
            Err(e) => {
                tracing::warn!(worker = %worker_id, error = %e, "worker registration failed; retrying");
                tokio::time::sleep(config.store_backoff).await;
            }
        }
    }
    tracing::info!(worker = %worker_id, "worker online");

    let supervisor = Supervisor::new(
        Arc::clone(&store),
        registry,
        config.clone(),
        worker_id.clone(),
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Idle heartbeat: the record must stay fresh between claims or the
        // sweeper will treat us as dead.
        if let Err(e) = store.heartbeat(&worker_id).await {
            tracing::warn!(worker = %worker_id, error = %e, "idle heartbeat failed");
            tokio::time::sleep(config.store_backoff).await;
            continue;
        }

        match store.claim_next(&worker_id).await {
            Ok(Some(claimed)) => {
                // The supervisor owns the task from here to its terminal
                // state; heartbeats move inside it for the duration.
                supervisor.run(claimed).await;
            }
            Ok(None) => {
                // Nothing claimable. Sleep until activity or a bounded
                // timeout, whichever comes first; the timeout keeps a lost
                // notification from stranding the loop.
                tokio::select! {
                    _ = shutdown_rx.changed() => continue,
                    _ = store.await_activity(config.dispatch_idle) => {}
                }
            }
            Err(e) => {
                tracing::warn!(worker = %worker_id, error = %e, "claim failed; backing off");
                tokio::time::sleep(config.store_backoff).await;
            }
        }
    }

    if let Err(e) = store.deregister_worker(&worker_id).await {
        tracing::warn!(worker = %worker_id, error = %e, "deregistration failed");
    }
    tracing::info!(worker = %worker_id, "worker stopped");
}
