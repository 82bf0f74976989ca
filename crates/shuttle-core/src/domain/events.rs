//! State-change notifications delivered to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskState;

/// One task state transition.
///
/// `from` is `None` for the event emitted when the task is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub task_id: TaskId,
    pub label: Option<String>,
    pub from: Option<TaskState>,
    pub to: TaskState,
    pub at: DateTime<Utc>,
}

impl StateChange {
    pub fn new(
        task_id: TaskId,
        label: Option<String>,
        from: Option<TaskState>,
        to: TaskState,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            label,
            from,
            to,
            at,
        }
    }

    /// Label if the task has one, otherwise the id.
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.task_id.to_string())
    }
}
