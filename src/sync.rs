// src/sync.rs

//! One-shot broadcast latch.
//!
//! The engine, the runnables and the trigger pumps all coordinate through the
//! same primitive: a signal that can be fired exactly once and observed by
//! any number of waiters, before or after the fact. This is the channel
//! `close()`-to-broadcast discipline expressed as an `AtomicBool` plus a
//! `Notify`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cloneable one-shot broadcast signal.
///
/// All clones share the same state; firing one makes every clone observe
/// `is_fired() == true` and wakes every `fired()` waiter. Firing more than
/// once is harmless.
#[derive(Clone, Default)]
pub struct Latch {
    inner: Arc<LatchInner>,
}

#[derive(Default)]
struct LatchInner {
    fired: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch. Idempotent.
    pub fn fire(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Completes when the latch fires; resolves immediately if it already
    /// has. Safe to await from any number of tasks.
    pub async fn fired(&self) {
        // Register interest before checking the flag, otherwise a fire()
        // between the check and the wait would be lost.
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.inner.notify.notified());
        }
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch")
            .field("fired", &self.is_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fire_wakes_waiters_and_later_observers() {
        let latch = Latch::new();
        let observer = latch.clone();

        let waiter = tokio::spawn(async move { observer.fired().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!latch.is_fired());
        latch.fire();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();

        // Observing after the fact resolves immediately.
        tokio::time::timeout(Duration::from_millis(100), latch.fired())
            .await
            .expect("already-fired latch should resolve immediately");
    }

    #[tokio::test]
    async fn fire_is_idempotent() {
        let latch = Latch::new();
        latch.fire();
        latch.fire();
        assert!(latch.is_fired());
    }
}
