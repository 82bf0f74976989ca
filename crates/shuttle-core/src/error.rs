use thiserror::Error;

use crate::domain::{TaskId, TaskState};
use crate::queue::CycleError;

/// Synchronous errors returned by queue operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dependency edges would close a cycle. Nothing was changed.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// A bounded queue already holds `capacity` unfinished tasks.
    #[error("queue is at capacity ({capacity} live tasks)")]
    Capacity { capacity: usize },

    #[error("max concurrency must be at least 1 (got {0})")]
    InvalidConcurrency(usize),

    #[error("max concurrency of a serial queue is fixed at 1")]
    SerialQueue,

    #[error("task {0} is already {1}; dependencies can only be added before it starts")]
    AlreadyStarted(TaskId, TaskState),

    #[error("task {0} is still {1}")]
    NotTerminal(TaskId, TaskState),

    #[error("queue is closed")]
    QueueClosed,
}

/// Error returned by a task action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The action saw the cancellation flag and stopped.
    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
