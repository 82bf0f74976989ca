//! Submission-side description of a task.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use crate::action::{TaskAction, TaskContext, action_fn};
use crate::error::ActionError;

/// Scheduling priority. Higher priorities are claimed first among Ready
/// tasks; within one priority, submission order wins.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Default,
    High,
}

/// Everything needed to submit a task: the action plus scheduling metadata.
///
/// ```ignore
/// let spec = TaskSpec::from_fn(|ctx| async move {
///     ctx.checkpoint()?;
///     Ok(())
/// })
/// .label("index")
/// .depends_on(fetch_id)
/// .priority(Priority::High);
/// ```
pub struct TaskSpec {
    pub(crate) label: Option<String>,
    pub(crate) priority: Priority,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) action: Box<dyn TaskAction>,
}

impl TaskSpec {
    pub fn new(action: impl TaskAction + 'static) -> Self {
        Self {
            label: None,
            priority: Priority::Default,
            dependencies: Vec::new(),
            timeout: None,
            action: Box::new(action),
        }
    }

    /// Build a spec from an async closure.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        Self::new(action_fn(f))
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, task_id: TaskId) -> Self {
        self.dependencies.push(task_id);
        self
    }

    pub fn depends_on_all(mut self, task_ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(task_ids);
        self
    }

    /// Advisory timeout. When it elapses the task is marked cancelled, but
    /// the worker stays busy until the action returns.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("label", &self.label)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
