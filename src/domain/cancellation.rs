//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A cheaply cloneable cancellation signal.
///
/// Cancellation is cooperative: raising the signal never interrupts work
/// directly; consumers check [`CancellationSignal::is_cancelled`] at their
/// suspension points, or race a wait against [`CancellationSignal::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancellationSignal {
    /// Creates a fresh, unraised signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes every waiter.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true once the signal has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Completes when the signal is raised. Completes immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Re-check after registering so a concurrent cancel() cannot
            // slip between the check and the wait.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
