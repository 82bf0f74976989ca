//! IdGenerator port.
//!
//! ULIDs built from the injected `Clock` plus random bits, so ids stay unique
//! across producers without coordination and tests can pin the time part.

use crate::domain::ids::{SubscriptionId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_subscription_id(&self) -> SubscriptionId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_subscription_id(&self) -> SubscriptionId {
        SubscriptionId::from(self.next_ulid())
    }
}
