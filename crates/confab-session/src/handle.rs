//! A cloneable handle for observing and interrupting a session from outside.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle owning the session's single abortable stream token.
///
/// The token is acquired fresh when a turn enters streaming and released on
/// every exit path, so it is never left dangling across turns. All fields
/// are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    cancel: Arc<Mutex<CancellationToken>>,
    is_running: Arc<AtomicBool>,
    idle_notify: Arc<tokio::sync::Notify>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_running: Arc::new(AtomicBool::new(false)),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Claim the single turn slot. Returns `false` if a turn is in flight.
    pub(crate) fn try_begin(&self) -> bool {
        self.is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the turn slot and wake idle waiters.
    pub(crate) fn finish(&self) {
        self.is_running.store(false, Ordering::Release);
        self.idle_notify.notify_waiters();
    }

    /// Install a fresh cancellation token for the next stream and return it.
    pub(crate) fn arm_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    /// Cancel the in-flight stream, if any.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Whether a turn is currently in flight.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Wait until the session becomes idle.
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_running.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}
