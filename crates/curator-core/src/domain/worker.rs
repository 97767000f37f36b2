//! Worker liveness records.
//!
//! Workers are OS processes with no shared memory; the only thing the rest
//! of the system knows about a worker is this row. A worker that stops
//! heartbeating simply *is* dead as far as scheduling is concerned, and the
//! sweeper reclaims whatever it owned.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::ids::TaskId;

/// Identity of a worker process, unique per process + host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Build an id from host and pid. A random suffix keeps ids unique when
    /// a pid is recycled between registrations.
    pub fn generate(host: &str) -> Self {
        let pid = std::process::id();
        let suffix: u16 = rand::random();
        Self(format!("{host}:{pid}:{suffix:04x}"))
    }

    /// Fixed id, mainly for tests and single-worker tools.
    pub fn new(host: &str, pid: u32) -> Self {
        Self(format!("{host}:{pid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Liveness record for one worker process.
///
/// Invariant: `current_task_id` is non-null only while that task is
/// Running/Canceling and owned by this worker (at most one task per worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task_id: Option<TaskId>,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            last_heartbeat: now,
            current_task_id: None,
        }
    }

    /// Has this worker's heartbeat expired?
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        now - self.last_heartbeat > ttl
    }
}
