//! Liveness sweeper: periodically reclaims tasks owned by workers whose
//! heartbeat expired.
//!
//! The sweep itself is idempotent and safe to run from every node; the
//! store's terminal-state guard makes concurrent sweeps and late worker
//! reports converge on one outcome.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::ports::TaskStore;

pub(crate) async fn sweeper_loop(
    store: Arc<dyn TaskStore>,
    config: SchedulerConfig,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut ticks = tokio::time::interval(config.sweep_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticks.tick() => {
                // The store logs each reclaimed worker; only failures are
                // interesting here.
                if let Err(e) = store.sweep_expired_workers(config.worker_ttl).await {
                    tracing::warn!(error = %e, "liveness sweep failed");
                    tokio::time::sleep(config.store_backoff).await;
                }
            }
        }
    }
}
