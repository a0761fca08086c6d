//! Cooperative cancellation for running jobs.
//!
//! The registry keeps the [`CancellationSource`]; executors receive a
//! [`CancellationToken`] and poll it at their own safe points. Nothing here
//! interrupts a running thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationInner>,
}

/// Dropping the source does not cancel its tokens.
#[derive(Debug)]
pub struct CancellationSource {
    inner: Arc<CancellationInner>,
}

#[derive(Debug, Default)]
struct CancellationInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner::default()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns `true` if this call was the one that flipped the flag.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sleeps for up to `duration`, waking early on cancellation. Returns
    /// `true` if cancelled.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let mut guard = self.inner.lock.lock();
        if self.is_cancelled() {
            return true;
        }
        let _ = self.inner.wake.wait_for(&mut guard, duration);
        self.is_cancelled()
    }
}
