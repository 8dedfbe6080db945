//! Fixed-size browser pool (§C1): pre-warms a set of browser processes,
//! hands them out one at a time behind a rendezvous buffer, health-checks
//! on every pickup, and proactively recycles aging or unhealthy workers.
//!
//! Grounded on the teacher lineage's `riptide-headless::pool` module: a
//! `PooledBrowser`-style entry owning its handle, an available/in-use split,
//! a background management task driving periodic maintenance, and a
//! checkout/checkin pair with a best-effort Drop fallback.

mod config;
mod error;

pub use config::BrowserPoolConfig;
pub use error::PoolError;

use chromiumoxide::Browser;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use wraith_browser::{health_probe, launch, launch_with_proxy, LaunchedBrowser};

/// Cancellation token accepted by [`BrowserPool::acquire`]. Re-exported from
/// `wraith-browser` rather than duplicated — the same "fire once, many
/// waiters observe it" semantics apply to a caller cancelling an acquire as
/// to a caller cancelling a page interceptor installation.
pub use wraith_browser::StopSignal as Cancellation;

/// One owned browser process plus the bookkeeping the pool needs (§3
/// BrowserEntry). Exists in exactly one place at a time: either moved into
/// the available channel, or held by whichever task checked it out.
struct BrowserEntry {
    id: String,
    created_at: Instant,
    use_count: u64,
    browser: LaunchedBrowser,
}

/// Point-in-time snapshot of the pool's counters (§3, §8). Cheap to compute;
/// safe to poll from the `/metrics` surface.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub available: usize,
    pub acquired: u64,
    pub released: u64,
    pub recycled: u64,
    pub errors: u64,
    pub leaked_close_tasks: u64,
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    recycled: AtomicU64,
    errors: AtomicU64,
    leaked_close_tasks: AtomicU64,
}

/// Guarded by a single mutex together with the sender half of the available
/// channel, so "is the pool closed" and "send the handle back" are one
/// atomic step from Release's point of view (§5 ordering guarantee 1).
struct PoolState {
    closed: bool,
    sender: Option<mpsc::Sender<BrowserEntry>>,
}

enum Parked {
    Yes,
    No(BrowserEntry),
}

/// Owns `size` browser processes and hands them out one at a time. Always
/// lives behind an `Arc` — acquired handles hold a strong reference so a
/// forgotten [`BrowserPool::release`] can still be cleaned up from `Drop`.
pub struct BrowserPool {
    config: BrowserPoolConfig,
    state: StdMutex<PoolState>,
    receiver: AsyncMutex<mpsc::Receiver<BrowserEntry>>,
    available: AtomicUsize,
    counters: Counters,
    recycle_semaphore: Arc<Semaphore>,
    /// Counts browser-close tasks spawned by `close_browser_bounded` that
    /// have not yet finished. A counter plus a `Notify`, rather than a
    /// `Vec<JoinHandle>` that only ever grows, so long-running recycling
    /// (aged-browser sweeps, memory-pressure recycle-all, unhealthy
    /// pickups) doesn't leak memory in an idle pool (§4.1, §7 wait-group).
    close_tasks_in_flight: AtomicUsize,
    close_tasks_notify: Notify,
    stop: Cancellation,
    background: AsyncMutex<Vec<JoinHandle<()>>>,
}

/// A checked-out browser. `release()` is the documented way to return it;
/// dropping it without releasing still closes the underlying process (via a
/// background task) rather than leaking it, matching the teacher's
/// `BrowserCheckout` Drop fallback — but it will not reach the warn log
/// path a well-behaved caller is expected to avoid.
pub struct BrowserHandle {
    entry: Option<BrowserEntry>,
    pool: Arc<BrowserPool>,
}

impl BrowserHandle {
    pub fn browser(&self) -> &Browser {
        &self
            .entry
            .as_ref()
            .expect("BrowserHandle used after release")
            .browser
            .browser
    }

    pub fn id(&self) -> &str {
        &self
            .entry
            .as_ref()
            .expect("BrowserHandle used after release")
            .id
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            tracing::warn!(browser_id = %entry.id, "BrowserHandle dropped without release(), closing in background");
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release_entry(entry).await;
            });
        }
    }
}

impl BrowserPool {
    /// Launch `config.size` browsers in series; on any launch failure, tear
    /// down everything already created and fail (§4.1 Construct, §8
    /// scenario 1).
    pub async fn new(config: BrowserPoolConfig) -> Result<Arc<Self>, PoolError> {
        let (sender, receiver) = mpsc::channel(config.size.max(1));

        let mut launched = Vec::with_capacity(config.size);
        for index in 0..config.size {
            match launch(&config.launch).await {
                Ok(browser) => launched.push(browser),
                Err(source) => {
                    for stray in launched {
                        if let Err(e) = stray.browser.close().await {
                            tracing::warn!(error = %e, "failed to close browser during pre-warm rollback");
                        }
                    }
                    return Err(PoolError::SpawnFailed { index, source });
                }
            }
        }

        let recycle_semaphore = Arc::new(Semaphore::new(config.recycle_concurrency));
        let pool = Arc::new(Self {
            config,
            state: StdMutex::new(PoolState {
                closed: false,
                sender: Some(sender),
            }),
            receiver: AsyncMutex::new(receiver),
            available: AtomicUsize::new(0),
            counters: Counters::default(),
            recycle_semaphore,
            close_tasks_in_flight: AtomicUsize::new(0),
            close_tasks_notify: Notify::new(),
            stop: Cancellation::new(),
            background: AsyncMutex::new(Vec::new()),
        });

        for browser in launched {
            let entry = BrowserEntry {
                id: uuid::Uuid::new_v4().to_string(),
                created_at: Instant::now(),
                use_count: 0,
                browser,
            };
            if let Parked::No(entry) = pool.try_park(entry) {
                tracing::error!("failed to park freshly launched browser during construction");
                let _ = entry.browser.browser.close().await;
            }
        }

        pool.spawn_background_loops().await;
        Ok(pool)
    }

    /// Wait on the rendezvous buffer for a healthy browser. Retries up to
    /// `max_acquire_retries` times when a pickup turns out unhealthy,
    /// dispatching the unhealthy handle to background recycling each time
    /// (§4.1 Acquire).
    pub async fn acquire(self: &Arc<Self>, cancel: &Cancellation) -> Result<BrowserHandle, PoolError> {
        for _ in 0..self.config.max_acquire_retries {
            let entry = tokio::select! {
                _ = cancel.cancelled() => return Err(PoolError::ContextCanceled),
                res = tokio::time::timeout(self.config.acquire_timeout, self.recv_one()) => {
                    match res {
                        Err(_) => return Err(PoolError::Timeout),
                        Ok(None) => return Err(PoolError::Closed),
                        Ok(Some(entry)) => entry,
                    }
                }
            };

            match health_probe(&entry.browser.browser).await {
                Ok(()) => {
                    self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                    let mut entry = entry;
                    entry.use_count += 1;
                    return Ok(BrowserHandle {
                        entry: Some(entry),
                        pool: self.clone(),
                    });
                }
                Err(reason) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(browser_id = %entry.id, error = %reason, "unhealthy pickup, recycling and retrying");
                    let pool = self.clone();
                    tokio::spawn(async move {
                        pool.recycle_guarded(entry).await;
                    });
                }
            }
        }

        Err(PoolError::BrowserUnhealthy(format!(
            "no healthy browser after {} attempts",
            self.config.max_acquire_retries
        )))
    }

    /// Clean up the browser's pages and re-park it, or recycle it if
    /// cleanup failed, or close it outright if the pool is closed (§4.1
    /// Release).
    pub async fn release(self: &Arc<Self>, mut handle: BrowserHandle) {
        if let Some(entry) = handle.entry.take() {
            self.release_entry(entry).await;
        }
    }

    async fn release_entry(self: &Arc<Self>, entry: BrowserEntry) {
        self.counters.released.fetch_add(1, Ordering::Relaxed);

        if self.cleanup_pages(&entry).await.is_err() {
            tracing::warn!(browser_id = %entry.id, "page cleanup failed on release, recycling");
            let pool = self.clone();
            tokio::spawn(async move {
                pool.recycle_guarded(entry).await;
            });
            return;
        }

        match self.try_park(entry) {
            Parked::Yes => {}
            Parked::No(entry) => self.close_browser_bounded(entry).await,
        }
    }

    async fn cleanup_pages(&self, entry: &BrowserEntry) -> Result<(), ()> {
        let pages = entry.browser.browser.pages().await.map_err(|_| ())?;
        for page in pages {
            if page.goto("about:blank").await.is_err() {
                return Err(());
            }
            if page.close().await.is_err() {
                return Err(());
            }
        }
        Ok(())
    }

    /// Create a standalone, non-pooled browser behind the given proxy. The
    /// caller owns its full lifetime (§4.1 SpawnWithProxy).
    pub async fn spawn_with_proxy(&self, proxy_url: String) -> Result<LaunchedBrowser, PoolError> {
        launch_with_proxy(self.config.launch.clone(), proxy_url)
            .await
            .map_err(PoolError::ProxySpawnFailed)
    }

    /// Idempotent. Marks the pool closed (unblocking anyone parked in
    /// `acquire`), stops the background loops, waits for in-flight
    /// close-tasks, then closes every remaining parked browser in parallel
    /// with bounded concurrency (§4.1 Close).
    pub async fn close(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().expect("pool mutex poisoned");
            if state.closed {
                return;
            }
            state.closed = true;
            state.sender = None;
        }

        self.stop.fire();

        let loops = {
            let mut guard = self.background.lock().await;
            std::mem::take(&mut *guard)
        };
        if tokio::time::timeout(self.config.shutdown_loop_timeout, futures::future::join_all(loops))
            .await
            .is_err()
        {
            tracing::warn!("background loops did not stop within shutdown timeout");
        }

        if tokio::time::timeout(
            self.config.shutdown_close_task_timeout,
            self.wait_for_close_tasks(),
        )
        .await
        .is_err()
        {
            tracing::warn!("in-flight browser close tasks did not finish within shutdown timeout");
        }

        let remaining = self.drain_available().await;

        let sem = Arc::new(Semaphore::new(self.config.close_concurrency));
        let handles: Vec<_> = remaining
            .into_iter()
            .map(|entry| {
                let sem = sem.clone();
                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await;
                    if let Err(e) = entry.browser.browser.close().await {
                        tracing::warn!(browser_id = %entry.id, error = %e, "error closing browser during pool shutdown");
                    }
                })
            })
            .collect();
        futures::future::join_all(handles).await;
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.available.load(Ordering::Relaxed),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            recycled: self.counters.recycled.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            leaked_close_tasks: self.counters.leaked_close_tasks.load(Ordering::Relaxed),
        }
    }

    /// Pulls one entry out of the rendezvous buffer, mirroring the removal
    /// in `available` immediately so the counter reflects "currently
    /// parked" the instant the handle leaves the channel, regardless of
    /// whether the caller's health probe later succeeds or fails.
    async fn recv_one(&self) -> Option<BrowserEntry> {
        let mut rx = self.receiver.lock().await;
        let entry = rx.recv().await;
        if entry.is_some() {
            self.available.fetch_sub(1, Ordering::AcqRel);
        }
        entry
    }

    /// Park `entry` into the available buffer under the single pool mutex,
    /// atomically checked against the closed flag (§5 ordering guarantee 1).
    /// Never awaits while holding the lock.
    fn try_park(&self, entry: BrowserEntry) -> Parked {
        let state = self.state.lock().expect("pool mutex poisoned");
        if state.closed {
            return Parked::No(entry);
        }
        match state.sender.as_ref() {
            Some(sender) => match sender.try_send(entry) {
                Ok(()) => {
                    self.available.fetch_add(1, Ordering::AcqRel);
                    Parked::Yes
                }
                Err(mpsc::error::TrySendError::Full(entry)) => Parked::No(entry),
                Err(mpsc::error::TrySendError::Closed(entry)) => Parked::No(entry),
            },
            None => Parked::No(entry),
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().expect("pool mutex poisoned").closed
    }

    async fn recycle_guarded(self: &Arc<Self>, entry: BrowserEntry) {
        let Ok(_permit) = self.recycle_semaphore.clone().acquire_owned().await else {
            return;
        };
        self.recycle(entry).await;
    }

    /// Recycle protocol (§4.1): close the old browser bounded by 10 s,
    /// spawn a replacement bounded by 30 s (aborting if the pool has
    /// since closed), swap the entry in place by parking the new handle.
    async fn recycle(self: &Arc<Self>, entry: BrowserEntry) {
        self.counters.recycled.fetch_add(1, Ordering::Relaxed);
        self.close_browser_bounded(entry).await;

        if self.is_closed() {
            return;
        }

        match tokio::time::timeout(self.config.recycle_spawn_timeout, launch(&self.config.launch)).await {
            Ok(Ok(browser)) => {
                let fresh = BrowserEntry {
                    id: uuid::Uuid::new_v4().to_string(),
                    created_at: Instant::now(),
                    use_count: 0,
                    browser,
                };
                match self.try_park(fresh) {
                    Parked::Yes => {}
                    Parked::No(fresh) => self.close_browser_bounded(fresh).await,
                }
            }
            Ok(Err(e)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "recycle failed to spawn replacement browser");
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("recycle replacement spawn timed out");
            }
        }
    }

    /// Close `entry`'s browser on a spawned task tracked by the in-flight
    /// wait-group counter (not an ever-growing handle list), but don't
    /// block the caller past `recycle_close_timeout` — a slow close is
    /// counted as leaked rather than forcibly killed (§4.1, §7).
    async fn close_browser_bounded(self: &Arc<Self>, entry: BrowserEntry) {
        self.close_tasks_in_flight.fetch_add(1, Ordering::AcqRel);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let id = entry.id.clone();
        let pool = self.clone();
        tokio::spawn(async move {
            if let Err(e) = entry.browser.browser.close().await {
                tracing::warn!(browser_id = %entry.id, error = %e, "error closing recycled browser");
            }
            let _ = done_tx.send(());
            if pool.close_tasks_in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                pool.close_tasks_notify.notify_waiters();
            }
        });

        if tokio::time::timeout(self.config.recycle_close_timeout, done_rx)
            .await
            .is_err()
        {
            let leaked = self.counters.leaked_close_tasks.fetch_add(1, Ordering::Relaxed) + 1;
            if leaked >= self.config.leaked_close_task_warn_threshold {
                tracing::error!(browser_id = %id, leaked_close_tasks = leaked, "leaked close-task count crossed warn threshold");
            } else {
                tracing::warn!(browser_id = %id, "browser close exceeded bounded timeout, counted as leaked");
            }
        }
    }

    /// Waits until every in-flight close task has decremented the counter
    /// to zero. Builds the `notified()` future before re-checking the
    /// counter so a `notify_waiters()` firing between the check and the
    /// await can never be missed.
    async fn wait_for_close_tasks(&self) {
        loop {
            let notified = self.close_tasks_notify.notified();
            if self.close_tasks_in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn spawn_background_loops(self: &Arc<Self>) {
        let memory = {
            let pool = self.clone();
            tokio::spawn(async move { pool.memory_monitor_loop().await })
        };
        let health = {
            let pool = self.clone();
            tokio::spawn(async move { pool.health_check_loop().await })
        };
        let mut guard = self.background.lock().await;
        guard.push(memory);
        guard.push(health);
    }

    /// Every `memory_check_interval`, read this process's RSS; above
    /// `max_memory_mb`, recycle every currently-available browser (§4.1
    /// Background loops: Memory monitor).
    async fn memory_monitor_loop(self: Arc<Self>) {
        let pid = sysinfo::get_current_pid().ok();
        let mut ticker = tokio::time::interval(self.config.memory_check_interval);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(pid) = pid else { continue };
                    let mut system = sysinfo::System::new();
                    system.refresh_process(pid);
                    let Some(process) = system.process(pid) else { continue };
                    let memory_mb = process.memory() / (1024 * 1024);
                    if memory_mb > self.config.max_memory_mb {
                        tracing::warn!(memory_mb, limit_mb = self.config.max_memory_mb, "pool memory threshold exceeded, recycling all available browsers");
                        self.recycle_all_available().await;
                    }
                }
            }
        }
    }

    /// Every `health_check_interval`, recycle available browsers older than
    /// `max_age` (§4.1 Background loops: Health check).
    async fn health_check_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.recycle_aged_available().await;
                }
            }
        }
    }

    /// Drains every handle currently parked in the buffer, mirroring the
    /// removal in `available` by the drained count so the counter keeps
    /// tracking "currently parked" rather than drifting upward every time a
    /// caller re-parks what it just drained (§3 invariant, §8 property).
    async fn drain_available(&self) -> Vec<BrowserEntry> {
        let mut rx = self.receiver.lock().await;
        let mut drained = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            drained.push(entry);
        }
        if !drained.is_empty() {
            self.available.fetch_sub(drained.len(), Ordering::AcqRel);
        }
        drained
    }

    async fn recycle_all_available(self: &Arc<Self>) {
        for entry in self.drain_available().await {
            let pool = self.clone();
            tokio::spawn(async move { pool.recycle_guarded(entry).await });
        }
    }

    async fn recycle_aged_available(self: &Arc<Self>) {
        let drained = self.drain_available().await;
        let max_age = self.config.max_age;
        for entry in drained {
            if entry.created_at.elapsed() > max_age {
                let pool = self.clone();
                tokio::spawn(async move { pool.recycle_guarded(entry).await });
            } else if let Parked::No(entry) = self.try_park(entry) {
                self.close_browser_bounded(entry).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(size: usize) -> BrowserPoolConfig {
        BrowserPoolConfig {
            size,
            acquire_timeout: Duration::from_millis(200),
            max_acquire_retries: 2,
            health_check_interval: Duration::from_secs(3600),
            memory_check_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    #[test]
    fn stats_start_at_zero() {
        // Pure accounting check that doesn't require launching a real
        // browser: counters default to zero before anything happens.
        let counters = Counters::default();
        assert_eq!(counters.acquired.load(Ordering::Relaxed), 0);
        assert_eq!(counters.released.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn config_defaults_match_documented_bounds() {
        let cfg = test_config(3);
        assert_eq!(cfg.size, 3);
        assert_eq!(cfg.max_acquire_retries, 2);
    }
}
