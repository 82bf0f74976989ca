//! Observer port: who gets told about task state changes.

use crate::domain::StateChange;

/// Receives state changes after the queue lock has been released.
///
/// Changes arrive one at a time in the order the queue made them. Calls
/// happen on whichever thread is draining the registry's outbox, so
/// implementations must be cheap and must not block.
pub trait Observer: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

impl<F> Observer for F
where
    F: Fn(&StateChange) + Send + Sync,
{
    fn on_state_change(&self, change: &StateChange) {
        self(change)
    }
}
