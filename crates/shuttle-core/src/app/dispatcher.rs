//! Dispatcher: the queue plus the worker pool that drains it.

use std::sync::Arc;

use tracing::info;

use crate::domain::{SubscriptionId, TaskId, TaskSpec, TaskState};
use crate::error::DispatchError;
use crate::observability::QueueCounts;
use crate::ports::Observer;
use crate::queue::{CancelOutcome, QueueMode, TaskHandle, TaskQueue, TaskSnapshot};
use crate::worker::WorkerPool;

/// Running dispatcher. Built with `DispatcherBuilder`.
///
/// Every method takes `&self`; share it with `Arc` across producers.
pub struct Dispatcher {
    queue: TaskQueue,
    pool: WorkerPool,
}

impl Dispatcher {
    pub(crate) fn new(queue: TaskQueue, pool: WorkerPool) -> Self {
        Self { queue, pool }
    }

    /// The underlying queue, for direct access.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, DispatchError> {
        self.queue.submit(spec)
    }

    pub fn add_dependency(&self, task: TaskId, depends_on: TaskId) -> Result<(), DispatchError> {
        self.queue.add_dependency(task, depends_on)
    }

    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome, DispatchError> {
        self.queue.cancel(id)
    }

    pub fn cancel_all(&self) -> usize {
        self.queue.cancel_all()
    }

    /// Change the concurrency limit and grow the pool to match.
    pub fn set_max_concurrency(&self, n: usize) -> Result<usize, DispatchError> {
        let previous = self.queue.set_max_concurrency(n)?;
        self.pool.grow_to(n);
        Ok(previous)
    }

    pub fn max_concurrency(&self) -> usize {
        self.queue.max_concurrency()
    }

    pub fn mode(&self) -> QueueMode {
        self.queue.mode()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.queue.state(id)
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.queue.snapshot(id)
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.queue.snapshots()
    }

    pub fn counts(&self) -> QueueCounts {
        self.queue.counts()
    }

    pub fn release(&self, id: TaskId) -> Result<TaskSnapshot, DispatchError> {
        self.queue.release(id)
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        self.queue.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.queue.unsubscribe(id)
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    /// Let every submitted task reach a terminal state, then stop the workers.
    /// New submissions are rejected from here on. A paused queue is resumed.
    pub async fn drain(&self) {
        self.queue.close();
        self.queue.resume();
        self.queue.wait_idle().await;
        self.pool.join().await;
        info!(counts = ?self.queue.counts(), "dispatcher drained");
    }

    /// Reject new submissions, cancel every live task and wait for the
    /// workers to stop. Running actions are not aborted; shutdown waits for
    /// them to return.
    pub async fn shutdown(&self) {
        self.queue.close();
        let cancelled = self.queue.cancel_all();
        self.pool.shutdown_and_join().await;
        info!(cancelled, "dispatcher shut down");
    }
}
