//! DispatcherBuilder: validation and wiring of queue, observers and workers.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::dispatcher::Dispatcher;
use crate::config::{ConfigError, DispatchConfig};
use crate::error::DispatchError;
use crate::ports::{Clock, IdGenerator, Observer, SystemClock, UlidGenerator};
use crate::queue::{CancelPolicy, QueueMode, TaskQueue};
use crate::worker::WorkerPool;

/// Builds a running `Dispatcher`.
///
/// ```ignore
/// let dispatcher = DispatcherBuilder::new()
///     .mode(QueueMode::Concurrent)
///     .max_concurrency(4)
///     .observer(Arc::new(TracingObserver))
///     .build()?;
/// ```
///
/// `build` spawns the worker pool, so it must run inside a tokio runtime.
pub struct DispatcherBuilder {
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    observers: Vec<Arc<dyn Observer>>,
    start_paused: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] DispatchError),
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::from_config(DispatchConfig::default())
    }

    pub fn from_config(config: DispatchConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ids: None,
            observers: Vec::new(),
            start_paused: false,
        }
    }

    pub fn mode(mut self, mode: QueueMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n;
        self
    }

    /// Initial worker count.
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    pub fn cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.config.cancel_policy = policy;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        // sub-millisecond timeouts round up so validation sees them as set
        self.config.default_timeout_ms = Some((timeout.as_millis() as u64).max(1));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Subscribe an observer before any task is submitted.
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Start with the queue paused; call `Dispatcher::resume` to begin.
    pub fn start_paused(mut self) -> Self {
        self.start_paused = true;
        self
    }

    pub fn build(self) -> Result<Dispatcher, BuildError> {
        self.config.validate()?;

        let mut options = self.config.queue_options();
        options.start_paused = self.start_paused;
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };
        let queue = TaskQueue::with_ports(options, self.clock, ids)?;
        for observer in self.observers {
            queue.subscribe(observer);
        }

        let workers = self.config.workers.max(self.config.effective_concurrency());
        let pool = WorkerPool::spawn(workers, queue.clone());
        info!(
            mode = %self.config.mode,
            max_concurrency = self.config.effective_concurrency(),
            workers,
            "dispatcher started"
        );
        Ok(Dispatcher::new(queue, pool))
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
