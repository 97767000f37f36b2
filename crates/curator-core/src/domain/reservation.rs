//! Resource reservations: who holds which resource, and in which mode.
//!
//! A resource is an opaque named entity (e.g. `"repository:rust-stable"`)
//! whose mutations must be serialized. The scheduler never interprets the
//! key; it only compares keys for equality.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::TaskId;

/// Opaque name of a contended resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Mutual-exclusion strength of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Conflicts with every other reservation on the same key.
    Exclusive,

    /// Conflicts only with Exclusive reservations on the same key.
    Shared,
}

impl LockMode {
    /// Can two reservations on the same key coexist?
    ///
    /// Exclusive は何とでも衝突、Shared は Exclusive とだけ衝突する。
    pub fn conflicts_with(self, other: LockMode) -> bool {
        matches!(
            (self, other),
            (LockMode::Exclusive, _) | (_, LockMode::Exclusive)
        )
    }
}

/// A (task, resource, mode) binding recording a declared or held lock.
///
/// Lifecycle: created atomically with the task at submission, deleted when
/// the task reaches a terminal state (or is reclaimed after worker death).
/// A reservation is *declared* while its task is Waiting and *held* once the
/// task is Running/Canceling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub task_id: TaskId,
    pub key: ResourceKey,
    pub mode: LockMode,
}
