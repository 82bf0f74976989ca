//! Queue module: task records, dependency graph, ready ordering and the
//! shared in-memory queue workers claim from.

mod dependency;
mod handle;
mod memory;
mod policy;
mod ready;
mod record;

pub use dependency::{CycleError, DependencyGraph};
pub use handle::TaskHandle;
pub use memory::{ActionReport, CancelOutcome, ClaimedTask, TaskQueue};
pub use policy::CancelPolicy;
pub use record::TaskSnapshot;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serial queues run one task at a time; concurrent queues up to their limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Serial,
    #[default]
    Concurrent,
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueMode::Serial => f.write_str("serial"),
            QueueMode::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// Queue construction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub mode: QueueMode,

    /// Ignored for serial queues, which always use 1.
    pub max_concurrency: usize,

    /// Upper bound on non-terminal tasks. `None` is unbounded.
    pub capacity: Option<usize>,
    pub cancel_policy: CancelPolicy,

    /// Applied to tasks submitted without their own timeout.
    pub default_timeout: Option<Duration>,
    pub start_paused: bool,
}

impl QueueOptions {
    pub fn serial() -> Self {
        Self {
            mode: QueueMode::Serial,
            max_concurrency: 1,
            ..Self::default()
        }
    }

    pub fn concurrent(max_concurrency: usize) -> Self {
        Self {
            mode: QueueMode::Concurrent,
            max_concurrency,
            ..Self::default()
        }
    }

    /// Concurrency limit actually enforced.
    pub fn effective_concurrency(&self) -> usize {
        match self.mode {
            QueueMode::Serial => 1,
            QueueMode::Concurrent => self.max_concurrency,
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            mode: QueueMode::Concurrent,
            max_concurrency: 4,
            capacity: None,
            cancel_policy: CancelPolicy::Cascade,
            default_timeout: None,
            start_paused: false,
        }
    }
}
