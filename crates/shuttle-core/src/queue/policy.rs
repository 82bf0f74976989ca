//! What happens to dependents when a dependency never finishes.

use serde::{Deserialize, Serialize};

use crate::domain::{CancelReason, DependencyCancelledError, Failure, TaskId, TaskOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Dependents that have not started become `Cancelled`.
    #[default]
    Cascade,

    /// Dependents that have not started become `Failed` with a
    /// `DependencyCancelledError` payload.
    FailFast,
}

impl CancelPolicy {
    /// Outcome for a waiting task whose dependency `dependency` will never finish.
    pub fn outcome_for(self, dependency: TaskId) -> TaskOutcome {
        match self {
            CancelPolicy::Cascade => {
                TaskOutcome::Cancelled(CancelReason::DependencyCancelled { dependency })
            }
            CancelPolicy::FailFast => TaskOutcome::Failed(Failure::DependencyCancelled(
                DependencyCancelledError { dependency },
            )),
        }
    }
}
