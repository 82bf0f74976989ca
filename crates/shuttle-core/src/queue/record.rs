//! Task record: the single source of truth for one task's state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::handle::TaskHandle;
use crate::action::TaskAction;
use crate::cancel::CancelFlag;
use crate::domain::{Priority, StateChange, TaskId, TaskOutcome, TaskSpec, TaskState};

/// Queue-owned record of a submitted task.
///
/// Design:
/// - Queue structures (ready heap, graph) hold `TaskId` only.
/// - Every transition goes through a `mark_*` method, which returns the
///   `StateChange` to publish once the queue lock is released.
pub(crate) struct TaskRecord {
    pub id: TaskId,
    pub label: Option<String>,
    pub priority: Priority,
    pub seq: u64,
    pub dependencies: Vec<TaskId>,
    pub timeout: Option<Duration>,
    pub state: TaskState,

    /// Taken by the worker that claims the task.
    pub action: Option<Box<dyn TaskAction>>,
    pub cancel: CancelFlag,

    /// `cancel` was called while the task was running.
    pub cancel_requested: bool,
    pub outcome: Option<TaskOutcome>,
    done: watch::Sender<Option<TaskOutcome>>,

    /// Advisory timeout timer, armed on claim.
    pub timer: Option<AbortHandle>,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        spec: TaskSpec,
        seq: u64,
        default_timeout: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        let (done, _rx) = watch::channel(None);
        Self {
            id,
            label: spec.label,
            priority: spec.priority,
            seq,
            dependencies: spec.dependencies,
            timeout: spec.timeout.or(default_timeout),
            state: TaskState::Pending,
            action: Some(spec.action),
            cancel: CancelFlag::new(),
            cancel_requested: false,
            outcome: None,
            done,
            timer: None,
            submitted_at: now,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.id, self.done.subscribe())
    }

    /// Event announcing the submission itself.
    pub fn submitted(&self, now: DateTime<Utc>) -> StateChange {
        StateChange::new(self.id, self.label.clone(), None, self.state, now)
    }

    fn transition(&mut self, to: TaskState, now: DateTime<Utc>) -> StateChange {
        let from = self.state;
        self.state = to;
        StateChange::new(self.id, self.label.clone(), Some(from), to, now)
    }

    pub fn mark_ready(&mut self, now: DateTime<Utc>) -> StateChange {
        self.transition(TaskState::Ready, now)
    }

    pub fn mark_pending(&mut self, now: DateTime<Utc>) -> StateChange {
        self.transition(TaskState::Pending, now)
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> StateChange {
        self.started_at = Some(now);
        self.transition(TaskState::Running, now)
    }

    /// Move to the terminal state matching `outcome` and wake handle waiters.
    pub fn settle(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) -> StateChange {
        let change = self.transition(outcome.state(), now);
        self.ended_at = Some(now);
        // never claimed: the action will not run
        self.action = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.outcome = Some(outcome.clone());
        self.done.send_replace(Some(outcome));
        change
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            label: self.label.clone(),
            priority: self.priority,
            state: self.state,
            dependencies: self.dependencies.clone(),
            outcome: self.outcome.clone(),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Read-only view of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub label: Option<String>,
    pub priority: Priority,
    pub state: TaskState,
    pub dependencies: Vec<TaskId>,
    pub outcome: Option<TaskOutcome>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}
