//! Task state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// State transitions:
/// - Pending -> Ready (all dependencies finished)
/// - Ready -> Pending (a new unfinished dependency was added)
/// - Ready -> Running -> Finished | Failed | Cancelled
/// - Pending | Ready -> Cancelled | Failed (cancelled, or a dependency never finished)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for at least one dependency.
    Pending,

    /// Eligible to be claimed by a worker.
    Ready,

    /// Claimed by a worker; the action is executing.
    Running,

    /// Cancelled before or during execution.
    Cancelled,

    /// The action completed.
    Finished,

    /// The action returned an error or panicked, or a dependency never finished
    /// under the fail-fast policy.
    Failed,
}

impl TaskState {
    /// No further transitions happen from a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Cancelled | TaskState::Finished | TaskState::Failed
        )
    }

    /// Not started yet (can still be cancelled outright or gain dependencies).
    pub fn is_waiting(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Ready)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Cancelled => "cancelled",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
