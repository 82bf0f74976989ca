use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

/// Per-state task counts of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub finished: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Ready => self.ready += 1,
            TaskState::Running => self.running += 1,
            TaskState::Finished => self.finished += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.live() + self.finished + self.cancelled + self.failed
    }

    /// Tasks not yet in a terminal state.
    pub fn live(&self) -> usize {
        self.pending + self.ready + self.running
    }
}

impl FromIterator<TaskState> for QueueCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = Self::default();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_collect_from_states() {
        let counts: QueueCounts = [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Finished,
            TaskState::Finished,
            TaskState::Failed,
        ]
        .into_iter()
        .collect();

        assert_eq!(counts.finished, 2);
        assert_eq!(counts.live(), 2);
        assert_eq!(counts.total(), 5);
    }
}
