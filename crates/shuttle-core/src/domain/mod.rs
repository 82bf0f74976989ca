//! Domain model (ids, states, outcomes, events, task specs).

pub mod events;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use events::StateChange;
pub use ids::{SubscriptionId, TaskId};
pub use outcome::{CancelReason, DependencyCancelledError, Failure, TaskOutcome};
pub use state::TaskState;
pub use task::{Priority, TaskSpec};
