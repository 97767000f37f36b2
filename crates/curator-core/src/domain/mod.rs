//! Domain model (ids, task records, states, reservations, workers,
//! outcomes, errors).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod reservation;
pub mod state;
pub mod task;
pub mod worker;

pub use errors::{CuratorError, FailureKind, TaskFailure};
pub use ids::TaskId;
pub use outcome::{CancelOutcome, TaskOutcome, TerminalOutcome};
pub use reservation::{LockMode, Reservation, ResourceKey};
pub use state::TaskState;
pub use task::{TaskName, TaskRecord, TaskSpec};
pub use worker::{WorkerId, WorkerRecord};
