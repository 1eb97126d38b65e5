//! Small synchronization helpers shared by the client threads.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot cancellation flag that sleeping threads can wait on.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter.
    pub(crate) fn cancel(&self) {
        let (flag, wakeup) = &*self.inner;
        *lock(flag) = true;
        wakeup.notify_all();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Sleep for `timeout` or until cancelled. Returns `true` if cancelled.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, wakeup) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock(flag);

        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = wakeup
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
