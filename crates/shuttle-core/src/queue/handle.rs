//! Awaitable handle returned by `submit`.

use tokio::sync::watch;

use crate::domain::{TaskId, TaskOutcome};
use crate::error::DispatchError;

/// Resolves once the task reaches a terminal state.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    outcome: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, outcome: watch::Receiver<Option<TaskOutcome>>) -> Self {
        Self { id, outcome }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Terminal outcome, if already reached.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the terminal outcome.
    ///
    /// Fails with `QueueClosed` if the task was dropped without settling,
    /// e.g. the queue itself was dropped.
    pub async fn wait(&self) -> Result<TaskOutcome, DispatchError> {
        let mut rx = self.outcome.clone();
        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| DispatchError::QueueClosed)?;
        settled.clone().ok_or(DispatchError::QueueClosed)
    }
}
