//! Ready set ordered by priority, then submission order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::domain::{Priority, TaskId};

/// Heap entry. Higher priority first; among equals, lower `seq` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReadyEntry {
    pub priority: Priority,
    pub seq: u64,
    pub task_id: TaskId,
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            // reversed: earlier submissions sit higher in the max-heap
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Entries are never removed eagerly. A task that left Ready (cancelled,
/// demoted to Pending) keeps a stale entry that `pop` callers skip by
/// checking the record's state.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    heap: BinaryHeap<ReadyEntry>,
}

impl ReadyQueue {
    pub fn push(&mut self, task_id: TaskId, priority: Priority, seq: u64) {
        self.heap.push(ReadyEntry {
            priority,
            seq,
            task_id,
        });
    }

    pub fn pop(&mut self) -> Option<ReadyEntry> {
        self.heap.pop()
    }
}
