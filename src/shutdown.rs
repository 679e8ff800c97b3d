//! Run-level cancellation shared across dispatcher and download tasks.
//!
//! A [`Shutdown`] handle is cloned into every spawned task. Requesting
//! shutdown is sticky: once set it never clears, submissions are refused, and
//! in-flight tasks stop at their next checkpoint (between retry attempts,
//! between streamed chunks). Completion-store writes are single atomic
//! statements, so stopping never leaves a partial record.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cloneable cancellation handle for one run.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    /// Creates a fresh, un-triggered handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent; wakes all waiters.
    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Waits until shutdown is requested. Returns immediately if it already
    /// was.
    pub async fn wait(&self) {
        let mut notified = std::pin::pin!(self.inner.notify.notified());
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}
