//! Observer registry and the stock observers.
//!
//! Changes are enqueued while the queue's state lock is held, which fixes
//! their order, and delivered after it is released. One thread drains the
//! outbox at a time, so every observer sees changes in enqueue order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::info;

use crate::domain::{StateChange, SubscriptionId};
use crate::ports::{IdGenerator, Observer};

#[derive(Default)]
struct Outbox {
    changes: VecDeque<StateChange>,
    draining: bool,
}

/// Interested parties keyed by subscription id.
pub struct ObserverRegistry {
    observers: RwLock<HashMap<SubscriptionId, Arc<dyn Observer>>>,
    outbox: Mutex<Outbox>,
    ids: Arc<dyn IdGenerator>,
}

impl ObserverRegistry {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            outbox: Mutex::new(Outbox::default()),
            ids,
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        let id = self.ids.generate_subscription_id();
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, observer);
        id
    }

    /// Returns false if the subscription was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Append changes to the outbox. Does not call any observer.
    pub fn enqueue(&self, changes: Vec<StateChange>) {
        if changes.is_empty() || self.is_empty() {
            return;
        }
        self.lock_outbox().changes.extend(changes);
    }

    /// Deliver everything in the outbox, in order, to every observer.
    ///
    /// Returns at once if another thread is already draining; that thread
    /// delivers the changes enqueued here as well. Observers may subscribe,
    /// unsubscribe or call back into the queue from their callback.
    pub fn flush(&self) {
        {
            let mut outbox = self.lock_outbox();
            if outbox.draining || outbox.changes.is_empty() {
                return;
            }
            outbox.draining = true;
        }
        let _draining = DrainGuard(self);

        loop {
            let batch: Vec<StateChange> = {
                let mut outbox = self.lock_outbox();
                if outbox.changes.is_empty() {
                    outbox.draining = false;
                    return;
                }
                outbox.changes.drain(..).collect()
            };
            let observers: Vec<Arc<dyn Observer>> = self
                .observers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            for change in &batch {
                for observer in &observers {
                    observer.on_state_change(change);
                }
            }
        }
    }

    fn lock_outbox(&self) -> std::sync::MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the draining flag if an observer panics mid-delivery.
struct DrainGuard<'a>(&'a ObserverRegistry);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock_outbox().draining = false;
        }
    }
}

/// Forwards every change into an unbounded channel for async consumers.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<StateChange>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StateChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn on_state_change(&self, change: &StateChange) {
        // receiver gone: nobody is listening any more
        let _ = self.tx.send(change.clone());
    }
}

/// Logs every change at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_state_change(&self, change: &StateChange) {
        let from = change.from.map(|s| s.as_str()).unwrap_or("submitted");
        info!(
            task_id = %change.task_id,
            task = %change.display_name(),
            from,
            to = %change.to,
            "task state changed"
        );
    }
}
