//! Status views over the store.

use serde::{Deserialize, Serialize};

/// Task tallies per state, for dashboards and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub waiting: usize,
    pub running: usize,
    pub canceling: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl TaskCounts {
    /// Tasks that still need scheduler attention.
    pub fn in_flight(&self) -> usize {
        self.waiting + self.running + self.canceling
    }
}
