//! Cooperative cancellation flags.
//!
//! The queue owns a `CancelFlag` per task and hands a `CancelSignal` to the
//! running action. Raising the flag never interrupts the action; the action
//! notices it at the points where it checks.

use std::sync::Arc;

use tokio::sync::watch;

/// Write side of a task's cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Idempotent.
    pub fn raise(&self) {
        // send_replace works without live receivers
        self.tx.send_replace(true);
    }

    #[cfg(test)]
    fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a task's cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is raised. Never resolves if the flag is dropped
    /// without being raised.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
