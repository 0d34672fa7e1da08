//! Cooperative, monotonic cancellation.
//!
//! Represented as an observable boolean plus a list of listeners, per the
//! design note replacing the source's implicit promise-cancellation —
//! external signals (a caller token, a timeout) register as listeners
//! that flip the same shared token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type Listener = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
}

/// A single cancellation source, shared by every context derived from one
/// execution's root. Cloning shares the same underlying flag.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Flip the token. Monotonic: a second call is a no-op. Listeners run
    /// exactly once, at the transition into the cancelled state.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            let listeners = std::mem::take(&mut *self.inner.listeners.lock());
            for listener in listeners {
                listener();
            }
        }
    }

    /// Run `f` when this token is cancelled. If it is already cancelled,
    /// `f` runs immediately.
    pub fn on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_cancelled() {
            f();
            return;
        }
        self.inner.listeners.lock().push(Box::new(f));
    }

    /// Link an external token: when `other` is cancelled, cascade to
    /// `self`. Used to wire a caller-provided signal into the run's
    /// internal token.
    pub fn link(&self, other: &CancellationToken) {
        let target = self.clone();
        other.on_cancel(move || target.cancel());
    }

    /// Arm a timeout that cancels this token if it fires before the
    /// returned guard is dropped. The guard's task is aborted on drop,
    /// so a normal completion disarms the timer.
    pub fn arm_timeout(&self, duration: std::time::Duration) -> TimeoutGuard {
        let token = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            token.cancel();
        });
        TimeoutGuard { handle }
    }
}

/// Disarms its timeout on drop.
pub struct TimeoutGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
