//! App layer: wiring of queue, observers and worker pool.
//!
//! - **DispatcherBuilder**: validated construction from config or by hand
//! - **Dispatcher**: facade over the running queue and its workers

pub mod builder;
pub mod dispatcher;

pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::dispatcher::Dispatcher;
