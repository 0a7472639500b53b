// src/core/tasks/async_task.rs

//! The polling contract shared by every task: NEW → RUNNING → DONE(outcome).

use crate::core::FileSealError;
use crate::core::errors::detail;
use std::fmt;
use strum_macros::Display;
use tokio_util::sync::CancellationToken;

/// The task-level result. Per-record and per-file failures are never reported
/// here; they live in the task's own error sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResult {
    Success,
    OutOfMemory,
    CommunicationError,
    LocalError,
    RemoteError,
}

/// A task-level result plus an optional numeric detail code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    pub result: TaskResult,
    pub detail: Option<i32>,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self {
            result: TaskResult::Success,
            detail: None,
        }
    }

    pub fn failure(result: TaskResult, detail: i32) -> Self {
        Self {
            result,
            detail: Some(detail),
        }
    }

    /// The outcome of a task that settled because cancellation was requested.
    pub fn interrupted() -> Self {
        Self::failure(TaskResult::LocalError, detail::INTERRUPTED)
    }

    pub fn is_success(&self) -> bool {
        self.result == TaskResult::Success
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail {
            Some(code) => write!(f, "{} ({})", self.result, code),
            None => write!(f, "{}", self.result),
        }
    }
}

impl From<&FileSealError> for TaskOutcome {
    fn from(err: &FileSealError) -> Self {
        match err {
            FileSealError::OutOfMemory => {
                TaskOutcome::failure(TaskResult::OutOfMemory, detail::NO_MEMORY)
            }
            FileSealError::ChannelUnavailable(_) => {
                TaskOutcome::failure(TaskResult::CommunicationError, detail::COMMUNICATION)
            }
            FileSealError::MalformedReply(_) => {
                TaskOutcome::failure(TaskResult::RemoteError, detail::PROTOCOL)
            }
            FileSealError::InvalidRequest(_) | FileSealError::BatchFull { .. } => {
                TaskOutcome::failure(TaskResult::LocalError, libc::EINVAL)
            }
            FileSealError::Io(e) => TaskOutcome::failure(
                TaskResult::LocalError,
                e.raw_os_error().unwrap_or(libc::EIO),
            ),
            FileSealError::Internal(_) => TaskOutcome::failure(TaskResult::LocalError, libc::EIO),
        }
    }
}

/// The lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    New,
    Running,
    Done(TaskOutcome),
}

impl TaskState {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskState::Done(_))
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        match self {
            TaskState::Done(outcome) => Some(*outcome),
            _ => None,
        }
    }
}

/// Lifecycle bookkeeping embedded in every task. Once done, the outcome does not
/// change until `reset` is called.
#[derive(Debug, Default)]
pub struct TaskCore {
    state: TaskState,
}

impl TaskCore {
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Moves a new task to running. No effect in any other state.
    pub fn start(&mut self) {
        if self.state == TaskState::New {
            self.state = TaskState::Running;
        }
    }

    /// Settles the task. The first outcome wins.
    pub fn finish(&mut self, outcome: TaskOutcome) -> TaskState {
        if !self.state.is_done() {
            self.state = TaskState::Done(outcome);
        }
        self.state
    }

    pub fn reset(&mut self) {
        self.state = TaskState::New;
    }
}

/// A task advanced by cooperative, non-blocking polling.
///
/// `poll` never blocks: it does whatever local work is possible, and returns
/// `Running` while a transaction is outstanding. Polling a done task returns the
/// same `Done` state and has no side effects. When `cancel` is triggered the task
/// drains any outstanding transaction, then settles into
/// `LOCAL_ERROR(INTERRUPTED)` at the next phase boundary.
pub trait AsyncTask {
    fn poll(&mut self, cancel: &CancellationToken) -> TaskState;

    fn state(&self) -> TaskState;

    /// Returns the task to `New`. Ignored while a transaction is outstanding.
    fn reset(&mut self);

    fn is_done(&self) -> bool {
        self.state().is_done()
    }

    fn outcome(&self) -> Option<TaskOutcome> {
        self.state().outcome()
    }
}
