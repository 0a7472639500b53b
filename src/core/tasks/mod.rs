// src/core/tasks/mod.rs

//! Tasks advanced by cooperative polling: the shared lifecycle, the batch
//! transaction driver, and the playground reclaim procedure.

pub mod async_task;
pub mod batch_transaction;
pub mod driver;
pub mod playground_reclaim;

pub use async_task::{AsyncTask, TaskCore, TaskOutcome, TaskResult, TaskState};
pub use batch_transaction::{BatchPhase, BatchTransactionTask, RequestSide};
pub use driver::drive;
pub use playground_reclaim::{PlaygroundReclaimTask, ReclaimPhase};
