//! Session manager (§C3): hands out long-lived browser+page contexts keyed
//! by a client-supplied session ID, with reference-counted destruction safe
//! against concurrent solve operations.
//!
//! Grounded on the teacher lineage's checkout/checkin discipline
//! (`riptide-headless::pool::BrowserCheckout`) generalized from "one pooled
//! browser" to "one pooled browser plus one long-lived page behind a
//! refcount," and on its own `sessions` module for the map-of-sessions
//! shape (`riptide-api::sessions::manager::SessionManager`).

mod config;
mod error;

pub use config::SessionManagerConfig;
pub use error::SessionError;

use chromiumoxide::Page;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use wraith_browser::StopSignal;
use wraith_pool::{BrowserHandle, BrowserPool};

/// A browser handle and the page carved from it, cleared together so
/// "browser returned to the pool exactly once" reduces to "exactly one
/// caller observes `Some` from this slot's `take()`" (§3 invariant, §5
/// ordering guarantee 4).
struct PageSlot {
    browser: BrowserHandle,
    page: Page,
}

/// One long-lived {browser, page} context keyed by a client-supplied ID
/// (§3 Session).
pub struct Session {
    id: String,
    created_at: Instant,
    last_used_nanos: AtomicI64,
    ref_count: AtomicU64,
    closing: AtomicBool,
    slot: StdMutex<Option<PageSlot>>,
    op_lock: AsyncMutex<()>,
    max_page_refs: u64,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn touch(&self) {
        let now_nanos = Instant::now().duration_since(self.created_at).as_nanos() as i64;
        self.last_used_nanos.store(now_nanos, Ordering::Release);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_used_nanos.load(Ordering::Acquire);
        let elapsed_since_creation = self.created_at.elapsed().as_nanos() as i64;
        Duration::from_nanos((elapsed_since_creation - last).max(0) as u64)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Serializes full solve operations on this session's page so two
    /// concurrent requests can't navigate it into an inconsistent state
    /// (§4.3 LockOperation / UnlockOperation, expressed as a mutex guard
    /// rather than a manual lock/unlock pair).
    pub fn operation_lock(&self) -> &AsyncMutex<()> {
        &self.op_lock
    }

    /// The sole safe way to touch the page (§4.3 AcquirePage). Refuses if
    /// the session is closing, the page has already been torn down, or the
    /// refcount has hit the runaway-leak ceiling.
    pub fn acquire_page(&self) -> Result<Page, SessionError> {
        let guard = self.slot.lock().expect("session page mutex poisoned");
        if self.closing.load(Ordering::Acquire) {
            return Err(SessionError::Closing);
        }
        let Some(slot) = guard.as_ref() else {
            return Err(SessionError::PageNil);
        };
        if self.ref_count.load(Ordering::Acquire) >= self.max_page_refs {
            return Err(SessionError::TooManyRefs);
        }
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(slot.page.clone())
    }

    /// Decrements the refcount with underflow protection. A negative result
    /// is clamped to zero and logged — it signals a caller bug, not a
    /// recoverable condition (§4.3 ReleasePage).
    pub fn release_page(&self) {
        let mut observed = self.ref_count.load(Ordering::Acquire);
        loop {
            if observed == 0 {
                tracing::error!(session_id = %self.id, "release_page called with refCount already zero");
                return;
            }
            let next = observed - 1;
            match self.ref_count.compare_exchange_weak(
                observed,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => observed = actual,
            }
        }
    }

    /// Convenience form of [`Session::acquire_page`] returning a page
    /// together with a once-only release closure.
    pub fn acquire_page_guarded(self: &Arc<Self>) -> Result<(Page, PageGuard), SessionError> {
        let page = self.acquire_page()?;
        Ok((
            page,
            PageGuard {
                session: self.clone(),
                released: AtomicBool::new(false),
            },
        ))
    }

    fn ref_count(&self) -> u64 {
        self.ref_count.load(Ordering::Acquire)
    }
}

/// Released automatically on drop if the caller never calls
/// [`PageGuard::release`] explicitly; safe to call either way exactly once.
pub struct PageGuard {
    session: Arc<Session>,
    released: AtomicBool,
}

impl PageGuard {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.session.release_page();
        }
    }
}

/// Owns the id→Session map and the TTL cleaner; layered over a
/// [`BrowserPool`] so expired or destroyed sessions return their browser
/// (§4.3 SessionManager).
pub struct SessionManager {
    pool: Arc<BrowserPool>,
    sessions: StdMutex<HashMap<String, Arc<Session>>>,
    config: SessionManagerConfig,
    stop: StopSignal,
    cleaner: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(pool: Arc<BrowserPool>, config: SessionManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            pool,
            sessions: StdMutex::new(HashMap::new()),
            config,
            stop: StopSignal::new(),
            cleaner: AsyncMutex::new(None),
        });
        manager.clone().spawn_cleaner();
        manager
    }

    fn spawn_cleaner(self: Arc<Self>) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.cleanup_interval);
            loop {
                tokio::select! {
                    _ = manager.stop.cancelled() => break,
                    _ = ticker.tick() => manager.run_cleanup_pass().await,
                }
            }
        });
        match self.cleaner.try_lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(_) => {
                // Always uncontended here: `new` has not yet handed the Arc
                // to anyone else when this runs.
                tokio::spawn(async move {
                    *self.cleaner.lock().await = Some(handle);
                });
            }
        }
    }

    /// Walks the map under the write lock marking every expired session
    /// `closing`, removing them from the map immediately, then outside the
    /// lock drains and returns each one's browser (§4.3 Background cleaner).
    async fn run_cleanup_pass(&self) {
        let ttl = self.config.ttl;
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().expect("session map mutex poisoned");
            let expired_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.idle_for() > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| {
                    let session = sessions.remove(&id)?;
                    session.closing.store(true, Ordering::Release);
                    Some(session)
                })
                .collect()
        };

        for session in expired {
            self.finalize_session(session, self.config.cleanup_drain_timeout)
                .await;
        }
    }

    /// Create a blank page on an already-acquired browser and store the
    /// session (§4.3 Create). On any failure the browser is returned to the
    /// pool rather than leaked.
    pub async fn create(
        &self,
        id: String,
        browser: BrowserHandle,
    ) -> Result<Arc<Session>, SessionError> {
        {
            let sessions = self.sessions.lock().expect("session map mutex poisoned");
            if sessions.contains_key(&id) {
                self.pool.release(browser).await;
                return Err(SessionError::AlreadyExists);
            }
            if sessions.len() >= self.config.max_sessions {
                self.pool.release(browser).await;
                return Err(SessionError::TooMany);
            }
        }

        let page = match browser.browser().new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                self.pool.release(browser).await;
                return Err(SessionError::PageCreateFailed(e.to_string()));
            }
        };

        let session = Arc::new(Session {
            id: id.clone(),
            created_at: Instant::now(),
            last_used_nanos: AtomicI64::new(0),
            ref_count: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            slot: StdMutex::new(Some(PageSlot { browser, page })),
            op_lock: AsyncMutex::new(()),
            max_page_refs: self.config.max_page_refs,
        });
        session.touch();

        let mut sessions = self.sessions.lock().expect("session map mutex poisoned");
        // Re-check under the lock: another create() may have raced us
        // between the pre-check above and the page creation just finished.
        if sessions.contains_key(&id) {
            drop(sessions);
            let PageSlot { browser, page } = session
                .slot
                .lock()
                .expect("session page mutex poisoned")
                .take()
                .expect("freshly built session always has a slot");
            let _ = page.close().await;
            self.pool.release(browser).await;
            return Err(SessionError::AlreadyExists);
        }
        sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Look up a session, refusing if missing or closing, and touch
    /// `lastUsed` (§4.3 Get).
    pub fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        let sessions = self.sessions.lock().expect("session map mutex poisoned");
        let session = sessions.get(id).ok_or(SessionError::NotFound)?;
        if session.is_closing() {
            return Err(SessionError::NotFound);
        }
        session.touch();
        Ok(session.clone())
    }

    /// Mark closing but keep the map entry until the refcount drains (or
    /// the drain window expires), then remove, swap the page to nil under
    /// its lock, close it, and return the browser (§4.3 Destroy).
    pub async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        let session = {
            let sessions = self.sessions.lock().expect("session map mutex poisoned");
            sessions.get(id).cloned().ok_or(SessionError::NotFound)?
        };
        session.closing.store(true, Ordering::Release);

        let deadline = Instant::now() + self.config.destroy_drain_timeout;
        while session.ref_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        if session.ref_count() > 0 {
            // closing stays set; the cleanup loop will finalize it later.
            return Err(SessionError::InUse);
        }

        {
            let mut sessions = self.sessions.lock().expect("session map mutex poisoned");
            sessions.remove(id);
        }

        self.finalize_session(session, Duration::ZERO).await;
        Ok(())
    }

    /// Swap the page out under its lock (a no-op if some other path already
    /// won the race), close it, and return the browser to the pool. Used by
    /// Destroy, the cleanup loop, and Close — whichever gets here first for
    /// a given session is the one that actually does the work.
    async fn finalize_session(&self, session: Arc<Session>, extra_wait: Duration) {
        if !extra_wait.is_zero() {
            let deadline = Instant::now() + extra_wait;
            while session.ref_count() > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        let taken = {
            let mut guard = session.slot.lock().expect("session page mutex poisoned");
            guard.take()
        };

        if let Some(PageSlot { browser, page }) = taken {
            if let Err(e) = page.close().await {
                tracing::warn!(session_id = %session.id, error = %e, "error closing session page during finalize");
            }
            self.pool.release(browser).await;
        }
    }

    /// Stop the cleaner, drain it, then close every remaining session in
    /// parallel with bounded concurrency (§4.3 Close).
    pub async fn close(&self) {
        self.stop.fire();
        if let Some(handle) = self.cleaner.lock().await.take() {
            let _ = handle.await;
        }

        let remaining: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().expect("session map mutex poisoned");
            sessions.drain().map(|(_, s)| s).collect()
        };

        for session in &remaining {
            session.closing.store(true, Ordering::Release);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.close_concurrency));
        let mut handles = Vec::with_capacity(remaining.len());
        for session in remaining {
            let semaphore = semaphore.clone();
            let pool = self.pool.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let taken = {
                    let mut guard = session.slot.lock().expect("session page mutex poisoned");
                    guard.take()
                };
                if let Some(PageSlot { browser, page }) = taken {
                    if let Err(e) = page.close().await {
                        tracing::warn!(session_id = %session.id, error = %e, "error closing session page during manager shutdown");
                    }
                    pool.release(browser).await;
                }
            }));
        }
        futures::future::join_all(handles).await;
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().expect("session map mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_page_on_zero_refcount_does_not_underflow() {
        let session = Session {
            id: "s".into(),
            created_at: Instant::now(),
            last_used_nanos: AtomicI64::new(0),
            ref_count: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            slot: StdMutex::new(None),
            op_lock: AsyncMutex::new(()),
            max_page_refs: 100,
        };
        session.release_page();
        assert_eq!(session.ref_count(), 0);
    }

    #[test]
    fn acquire_page_refuses_when_nil() {
        let session = Session {
            id: "s".into(),
            created_at: Instant::now(),
            last_used_nanos: AtomicI64::new(0),
            ref_count: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            slot: StdMutex::new(None),
            op_lock: AsyncMutex::new(()),
            max_page_refs: 100,
        };
        assert!(matches!(session.acquire_page(), Err(SessionError::PageNil)));
    }

    #[test]
    fn acquire_page_refuses_when_closing() {
        let session = Session {
            id: "s".into(),
            created_at: Instant::now(),
            last_used_nanos: AtomicI64::new(0),
            ref_count: AtomicU64::new(0),
            closing: AtomicBool::new(true),
            slot: StdMutex::new(None),
            op_lock: AsyncMutex::new(()),
            max_page_refs: 100,
        };
        assert!(matches!(session.acquire_page(), Err(SessionError::Closing)));
    }
}
