//! Cooperative cancellation.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable cancellation flag shared between a caller and a running batch.
///
/// The driver checks it before reading each streamed response and while
/// waiting out a backoff delay; [`CancellationToken::sleep`] wakes up early
/// when the token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every sleeper.
    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.wakeup.notify_all();
    }

    /// Clears the cancelled flag.
    pub fn reset(&self) {
        *self.inner.cancelled.lock() = false;
    }

    /// Returns true if the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleeps for `duration` or until cancelled.
    ///
    /// Returns true if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        if *cancelled || duration.is_zero() {
            return *cancelled;
        }
        let Some(deadline) = Instant::now().checked_add(duration) else {
            while !*cancelled {
                self.inner.wakeup.wait(&mut cancelled);
            }
            return true;
        };
        while !*cancelled {
            if self
                .inner
                .wakeup
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}
