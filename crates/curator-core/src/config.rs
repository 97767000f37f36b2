//! Scheduler configuration.
//!
//! [`SchedulerConfig`] defines the timing behavior of a worker process:
//! heartbeat cadence, liveness TTL, sweep interval, cancellation grace, and
//! dispatch idle bounds. Callers wire concrete values; there is no config
//! file layer here.

use std::time::Duration;

use crate::domain::CuratorError;

/// Timing configuration shared by the dispatch loop, supervisor, and
/// sweeper.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between heartbeat writes. Must be strictly shorter than
    /// `worker_ttl`, otherwise a healthy worker would look dead.
    pub heartbeat_interval: Duration,

    /// Heartbeats older than this mark a worker as lost.
    pub worker_ttl: Duration,

    /// Interval between liveness sweeps.
    pub sweep_interval: Duration,

    /// How long a Canceling task's body gets to stop cooperatively before
    /// it is terminated forcefully.
    pub cancel_grace: Duration,

    /// Upper bound on how long a dispatch loop sleeps waiting for work.
    /// Bounds the damage of a lost wake-up notification.
    pub dispatch_idle: Duration,

    /// Back-off after a transient store fault before retrying.
    pub store_backoff: Duration,

    /// Batch size for `purge_tasks`.
    pub purge_batch: usize,
}

impl Default for SchedulerConfig {
    /// Production-ish defaults:
    /// - `heartbeat_interval = 2s`, `worker_ttl = 10s`, `sweep_interval = 5s`
    /// - `cancel_grace = 10s`
    /// - `dispatch_idle = 1s`, `store_backoff = 500ms`
    /// - `purge_batch = 500`
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            worker_ttl: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            cancel_grace: Duration::from_secs(10),
            dispatch_idle: Duration::from_secs(1),
            store_backoff: Duration::from_millis(500),
            purge_batch: 500,
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations that break the liveness model.
    pub fn validate(&self) -> Result<(), CuratorError> {
        if self.heartbeat_interval >= self.worker_ttl {
            return Err(CuratorError::InvalidSpec(format!(
                "heartbeat_interval ({:?}) must be shorter than worker_ttl ({:?})",
                self.heartbeat_interval, self.worker_ttl
            )));
        }
        if self.dispatch_idle >= self.worker_ttl {
            return Err(CuratorError::InvalidSpec(format!(
                "dispatch_idle ({:?}) must be shorter than worker_ttl ({:?})",
                self.dispatch_idle, self.worker_ttl
            )));
        }
        if self.purge_batch == 0 {
            return Err(CuratorError::InvalidSpec(
                "purge_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
