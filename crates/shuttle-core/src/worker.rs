//! Worker pool executing claimed tasks.

use std::any::Any;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use crate::queue::{ActionReport, ClaimedTask, TaskQueue};

/// Elastic worker group.
/// - `request_shutdown` makes idle workers exit; running actions are never
///   aborted, their worker exits after reporting the result
/// - `grow_to` adds workers; the pool never shrinks
pub struct WorkerPool {
    queue: TaskQueue,
    shutdown_tx: watch::Sender<bool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `n` workers claiming from `queue`.
    pub fn spawn(n: usize, queue: TaskQueue) -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        let pool = Self {
            queue,
            shutdown_tx,
            joins: Mutex::new(Vec::with_capacity(n)),
        };
        pool.grow_to(n);
        pool
    }

    /// Grow the pool to at least `n` workers. Returns the new size.
    pub fn grow_to(&self, n: usize) -> usize {
        let mut joins = self.joins.lock().unwrap_or_else(PoisonError::into_inner);
        while joins.len() < n {
            let worker_id = joins.len();
            let queue = self.queue.clone();
            let mut rx = self.shutdown_tx.subscribe();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, &mut rx).await;
            }));
        }
        joins.len()
    }

    pub fn size(&self) -> usize {
        self.joins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Ask all workers to stop taking new tasks.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(&self) {
        self.request_shutdown();
        self.join().await;
    }

    /// Wait for all workers without requesting shutdown. Workers exit on their
    /// own once the queue is closed and drained.
    pub async fn join(&self) {
        let joins = std::mem::take(&mut *self.joins.lock().unwrap_or_else(PoisonError::into_inner));
        for join in joins {
            if let Err(err) = join.await {
                error!(%err, "worker task ended abnormally");
            }
        }
    }
}

async fn worker_loop(worker_id: usize, queue: TaskQueue, shutdown_rx: &mut watch::Receiver<bool>) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // claim may wait; race it against shutdown
        let claimed = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            claimed = queue.claim() => claimed,
        };

        let Some(task) = claimed else {
            // closed and nothing left waiting
            break;
        };
        run_task(worker_id, &queue, task).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Execute one claimed task and report the result. The action runs in its
/// own tokio task so a panic is caught instead of taking the worker down.
async fn run_task(worker_id: usize, queue: &TaskQueue, task: ClaimedTask) {
    let ClaimedTask {
        id,
        action,
        context,
        ..
    } = task;
    debug!(worker_id, task_id = %id, "executing task");

    let joined = tokio::spawn(async move { action.execute(context).await }).await;
    let report = match joined {
        Ok(result) => ActionReport::Returned(result),
        Err(err) => {
            let message = join_error_message(err);
            error!(worker_id, task_id = %id, %message, "action panicked");
            ActionReport::Panicked(message)
        }
    };
    queue.complete(id, report);
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Failure, TaskOutcome, TaskSpec};
    use crate::queue::QueueOptions;
    use std::time::Duration;

    #[tokio::test]
    async fn workers_run_submitted_tasks() {
        let queue = TaskQueue::new(QueueOptions::concurrent(2)).unwrap();
        let pool = WorkerPool::spawn(2, queue.clone());

        let h = queue
            .submit(TaskSpec::from_fn(|_ctx| async { Ok(()) }))
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), h.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Finished);

        pool.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn panicking_action_fails_task_and_worker_survives() {
        let queue = TaskQueue::new(QueueOptions::serial()).unwrap();
        let pool = WorkerPool::spawn(1, queue.clone());

        let bad = queue
            .submit(TaskSpec::from_fn(|_ctx| async { panic!("kaboom") }))
            .unwrap();
        let good = queue
            .submit(TaskSpec::from_fn(|_ctx| async { Ok(()) }))
            .unwrap();

        let outcome = bad.wait().await.unwrap();
        assert_eq!(outcome, TaskOutcome::Failed(Failure::Panicked("kaboom".into())));
        assert_eq!(good.wait().await.unwrap(), TaskOutcome::Finished);

        pool.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn grow_to_never_shrinks() {
        let queue = TaskQueue::new(QueueOptions::concurrent(1)).unwrap();
        let pool = WorkerPool::spawn(2, queue);

        assert_eq!(pool.grow_to(4), 4);
        assert_eq!(pool.grow_to(1), 4);
        assert_eq!(pool.size(), 4);

        pool.shutdown_and_join().await;
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn workers_exit_when_queue_closes() {
        let queue = TaskQueue::new(QueueOptions::concurrent(1)).unwrap();
        let pool = WorkerPool::spawn(3, queue.clone());

        queue.close();

        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .unwrap();
    }
}
