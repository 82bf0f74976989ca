//! shuttle-core
//!
//! Cooperative task dispatch: producers submit tasks to a serial or
//! concurrent queue, a dependency graph gates readiness, a worker pool runs
//! the actions and cancellation is observed by actions at safe points.
//!
//! # Modules
//! - **domain**: ids, states, outcomes, state-change events, task specs
//! - **ports**: seams (`Clock`, `IdGenerator`, `Observer`)
//! - **action**: the `TaskAction` trait and its `TaskContext`
//! - **queue**: dependency graph, task records, the shared `TaskQueue`
//! - **worker**: the elastic `WorkerPool`
//! - **app**: `DispatcherBuilder` and `Dispatcher`
//! - **config**: TOML `DispatchConfig`
//!
//! ```ignore
//! let dispatcher = DispatcherBuilder::new().max_concurrency(2).build()?;
//! let fetch = dispatcher.submit(TaskSpec::from_fn(|ctx| async move {
//!     ctx.checkpoint()?;
//!     Ok(())
//! }))?;
//! let index = dispatcher.submit(TaskSpec::new(Index).depends_on(fetch.id()))?;
//! index.wait().await?;
//! ```

pub mod action;
pub mod app;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod observer;
pub mod ports;
pub mod queue;
pub mod worker;

pub use action::{TaskAction, TaskContext, action_fn};
pub use app::{BuildError, Dispatcher, DispatcherBuilder};
pub use config::{ConfigError, DispatchConfig};
pub use domain::{
    CancelReason, DependencyCancelledError, Failure, Priority, StateChange, SubscriptionId,
    TaskId, TaskOutcome, TaskSpec, TaskState,
};
pub use error::{ActionError, DispatchError};
pub use observability::QueueCounts;
pub use observer::{ChannelObserver, TracingObserver};
pub use queue::{
    CancelOutcome, CancelPolicy, CycleError, QueueMode, QueueOptions, TaskHandle, TaskQueue,
    TaskSnapshot,
};
