//! Cancellable listener-group abstraction.
//!
//! An installed interceptor spawns one or more tasks that consume a page's
//! CDP event streams forever unless told to stop. A `ListenerGroup` bundles
//! those tasks behind a single idempotent cleanup closure: cancel a shared
//! stop flag, wake anything waiting on it, then join every task with a
//! bounded timeout. A terminal `Target.targetDestroyed` event is wired to
//! call the same cleanup path, so a caller that forgets to clean up does not
//! leak once the page itself goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const CLEANUP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared stop signal handed to every task in a group.
#[derive(Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// A fresh, unfired signal. Also usable standalone as a general-purpose
    /// cancellation token (e.g. `wraith_pool::Cancellation`) wherever the
    /// same "fire once, every waiter observes it" semantics are needed.
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn fire(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolves once `fire()` has been called, for use in a `tokio::select!`
    /// arm alongside a stream's `.next()`.
    pub async fn cancelled(&self) {
        if self.is_stopped() {
            return;
        }
        self.notify.notified().await;
    }
}

/// A handle returned by an interceptor installation. Dropping it does not
/// clean up the listeners — `cleanup()` (or letting `Target.targetDestroyed`
/// fire) must be called explicitly, matching the source contract that
/// cleanup is idempotent and safe to call any number of times.
pub struct ListenerGroup {
    stop: StopSignal,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    cleaned: AtomicBool,
}

impl ListenerGroup {
    pub fn new() -> (Arc<Self>, StopSignal) {
        let stop = StopSignal::new();
        let group = Arc::new(Self {
            stop: stop.clone(),
            tasks: std::sync::Mutex::new(Vec::new()),
            cleaned: AtomicBool::new(false),
        });
        (group, stop)
    }

    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().expect("listener group mutex poisoned").push(handle);
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Idempotent cleanup: safe to call concurrently and any number of times.
    pub async fn cleanup(self: &Arc<Self>) {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.fire();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("listener group mutex poisoned");
            std::mem::take(&mut *guard)
        };

        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(CLEANUP_JOIN_TIMEOUT, join_all).await.is_err() {
            tracing::warn!("listener group tasks did not join within cleanup timeout");
        }
    }
}
