//! Cooperative Cancellation
//!
//! A substrate-independent cancellation token checked at every suspension
//! point of an acquisition task. The scheduler owns one token per task and
//! hands it to exactly one strategy run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{AcquireError, AcquireResult};

/// Cooperative cancellation token.
///
/// Cloning is cheap; all clones observe the same done-flag. Cancellation is
/// level-triggered: `cancelled()` resolves immediately once the flag is set,
/// no matter when the waiter arrives.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates a new, un-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true once cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a cancel() between the
            // check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Fails with [`AcquireError::Cancelled`] once cancellation is requested
    pub fn check(&self) -> AcquireResult<()> {
        if self.is_cancelled() {
            Err(AcquireError::Cancelled)
        } else {
            Ok(())
        }
    }
}
