//! Per-IP token-bucket rate limiting with LRU eviction (§4.5 RateLimit).
//!
//! Grounded on the teacher lineage's `riptide-api::resource_manager::
//! rate_limiter::PerHostRateLimiter`: a `DashMap<String, _>` bucket keyed by
//! client identity with a periodic stale-entry sweep, generalized from
//! continuous token refill to the specification's fixed-window reset and
//! given a hard capacity with LRU eviction the teacher's unbounded map
//! doesn't need.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::error::ErrorBody;
use crate::middleware::client_ip;
use crate::state::AppState;

const MAX_CLIENTS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub rate: u32,
    pub window: Duration,
    pub trust_proxy: bool,
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: 120,
            window: Duration::from_secs(60),
            trust_proxy: false,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

struct Client {
    tokens: u32,
    last_reset: Instant,
}

/// Owns the client→bucket map and its background sweeper. `close()` is
/// idempotent via a one-shot guard (§4.5 "exposes a `Close` that is
/// idempotent").
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, Client>,
    closed: AtomicBool,
    cleaner: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        let limiter = Arc::new(Self {
            config,
            clients: DashMap::new(),
            closed: AtomicBool::new(false),
            cleaner: std::sync::Mutex::new(None),
        });
        limiter.clone().spawn_cleaner();
        limiter
    }

    fn spawn_cleaner(self: Arc<Self>) {
        let limiter = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.config.cleanup_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if limiter.closed.load(Ordering::Acquire) {
                    break;
                }
                limiter.sweep_stale();
            }
        });
        *self.cleaner.lock().expect("rate limiter mutex poisoned") = Some(handle);
    }

    /// Removes entries whose bucket hasn't rolled its window in over
    /// `2 * window` (§4.5 "background cleaner every 5 min").
    fn sweep_stale(&self) {
        let threshold = self.config.window * 2;
        let now = Instant::now();
        self.clients
            .retain(|_, client| now.duration_since(client.last_reset) <= threshold);
    }

    /// Allow or deny one request from `key`. Inserts a fresh bucket on first
    /// sight, evicting the least-recently-reset entry first if the map is
    /// already at capacity (§4.5, §8 boundary behavior).
    pub fn allow(&self, key: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        if !self.clients.contains_key(key) && self.clients.len() >= MAX_CLIENTS {
            self.evict_lru();
        }

        let now = Instant::now();
        let mut entry = self.clients.entry(key.to_string()).or_insert_with(|| Client {
            tokens: self.config.rate,
            last_reset: now,
        });

        if now.duration_since(entry.last_reset) >= self.config.window {
            entry.tokens = self.config.rate;
            entry.last_reset = now;
        }

        if entry.tokens > 0 {
            entry.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn evict_lru(&self) {
        let oldest = self
            .clients
            .iter()
            .min_by_key(|entry| entry.value().last_reset)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.clients.remove(&key);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self.cleaner.lock().expect("rate limiter mutex poisoned").take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = client_ip::from_connect_info(connect_info.as_ref());
    let ip = client_ip::derive(request.headers(), peer, state.config.rate_limit.trust_proxy)
        .unwrap_or(std::net::IpAddr::V4(client_ip::UNKNOWN_CLIENT));
    let key = client_ip::rate_limit_key(ip);

    if !state.rate_limiter.allow(&key) {
        tracing::warn!(client = %key, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", "60")],
            axum::Json(ErrorBody::now("rate limit exceeded")),
        )
            .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_rate_then_blocks() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rate: 5,
            window: Duration::from_millis(50),
            cleanup_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        let results: Vec<bool> = (0..6).map(|_| limiter.allow("1.2.3.4")).collect();
        assert_eq!(results, vec![true, true, true, true, true, false]);
    }

    #[tokio::test]
    async fn window_reset_allows_again() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rate: 1,
            window: Duration::from_millis(30),
            cleanup_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.allow("1.2.3.4"));
    }

    #[test]
    fn disabled_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            rate: 1,
            ..Default::default()
        });
        for _ in 0..10 {
            assert!(limiter.allow("anyone"));
        }
    }

    #[test]
    fn capacity_overflow_evicts_oldest_reset() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rate: 1,
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        // Seed one old entry, then fill to capacity with a manufactured
        // small cap by directly exercising eviction logic at unit scale:
        // functional coverage of the real 10_000 cap lives in integration
        // tests; here we just check the map holds and evicts by age.
        limiter.allow("first");
        std::thread::sleep(Duration::from_millis(5));
        limiter.allow("second");
        limiter.evict_lru();
        assert!(!limiter.clients.contains_key("first"));
        assert!(limiter.clients.contains_key("second"));
    }
}
