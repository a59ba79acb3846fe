//! Shared cooperative-shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Run flag shared between the orchestrator and every worker of one run.
///
/// Set once when the run starts and cleared once when it stops. Waiters
/// parked in [`RunFlag::cleared`] or [`RunFlag::sleep`] wake immediately on
/// clear, which keeps shutdown latency independent of interval lengths.
#[derive(Debug, Default)]
pub struct RunFlag {
    running: AtomicBool,
    cleared: Notify,
}

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag that starts out set.
    pub fn running() -> Self {
        let flag = Self::new();
        flag.set();
        flag
    }

    pub fn set(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Clear the flag and wake every waiter. Returns whether it was set.
    pub fn clear(&self) -> bool {
        let was_set = self.running.swap(false, Ordering::SeqCst);
        self.cleared.notify_waiters();
        was_set
    }

    pub fn is_set(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve once the flag is cleared.
    pub async fn cleared(&self) {
        loop {
            let notified = self.cleared.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent clear cannot slip between.
            notified.as_mut().enable();
            if !self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration`, returning early if the flag is cleared.
    ///
    /// Returns `true` if the flag is still set afterwards.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_set(),
            _ = self.cleared() => false,
        }
    }
}
