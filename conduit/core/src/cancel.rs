//! Cooperative cancellation.
//!
//! A [`CancelToken`] is shared between the lifecycle controller, the driver
//! task, and the producer for one stream. Cancellation is cooperative, not
//! preemptive: producers poll the token once per production step, so
//! cancellation latency is bounded by one chunk interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Shared cancellation signal for one stream
///
/// Cloning produces another handle to the same signal. Once raised the token
/// stays raised; there is no reset.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal, waking every task waiting in [`cancelled`](Self::cancelled)
    ///
    /// Idempotent; repeat calls are no-ops.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Check the signal without suspending
    ///
    /// Producers call this once per production step.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Suspend until the signal is raised
    ///
    /// Returns immediately if already raised. Any number of tasks may wait
    /// on the same token.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register as a waiter before the re-check so a cancel() between
            // the check and the await cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
