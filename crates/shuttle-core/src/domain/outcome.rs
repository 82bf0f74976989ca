//! Terminal outcomes of a task.
//!
//! Execution-time problems never cross thread boundaries as panics or lost
//! errors: they end up here, attached to the task's terminal state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskState;

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TaskOutcome {
    Finished,
    Cancelled(CancelReason),
    Failed(Failure),
}

impl TaskOutcome {
    /// The terminal state this outcome puts a task in.
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Finished => TaskState::Finished,
            TaskOutcome::Cancelled(_) => TaskState::Cancelled,
            TaskOutcome::Failed(_) => TaskState::Failed,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskOutcome::Finished)
    }
}

/// Why a task was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// `cancel` was called for this task.
    Requested,

    /// The advisory timeout elapsed while the task was running.
    TimedOut,

    /// The action gave up by returning `ActionError::Cancelled` on its own.
    ActionCancelled,

    /// A (transitive) dependency was cancelled or failed. Cascade policy.
    DependencyCancelled { dependency: TaskId },
}

/// A dependency of the task never reached `Finished`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("dependency {dependency} did not finish")]
pub struct DependencyCancelledError {
    pub dependency: TaskId,
}

/// Failure payload attached to a `Failed` task.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Failure {
    /// The action returned an error.
    #[error("action failed: {0}")]
    Action(String),

    /// The action panicked; the worker survived.
    #[error("action panicked: {0}")]
    Panicked(String),

    /// Fail-fast policy: a dependency was cancelled or failed.
    #[error(transparent)]
    DependencyCancelled(DependencyCancelledError),
}
