//! Domain stats engine (§C4): compresses per-hostname request history into
//! a suggested between-request delay and a negative-reinforcement ordering
//! over challenge-solving methods.
//!
//! Grounded on the teacher lineage's per-host bucket map
//! (`riptide-api::resource_manager::rate_limiter::PerHostRateLimiter`)
//! generalized from "token bucket" to "adaptive delay + method scoring,"
//! and kept to a single map-level mutex plus per-record locks rather than
//! `DashMap`'s internal sharding — the suggested-delay cache invalidation
//! and the counter-overflow reset both need to observe a fully consistent
//! record, which a single lock per record gives for free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Counter-overflow guard: reset the whole block before any field gets
/// close to this (§4.4 Counter-overflow policy). Comfortably below `u64`'s
/// range but matches the documented threshold exactly.
const OVERFLOW_THRESHOLD: u64 = 1 << 62;

/// Fixed method universe for Turnstile-like challenges, in default order
/// (§4.4 Method ordering).
pub const METHODS: [Method; 6] = [
    Method::Wait,
    Method::Shadow,
    Method::Keyboard,
    Method::Widget,
    Method::Iframe,
    Method::Positional,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Wait,
    Shadow,
    Keyboard,
    Widget,
    Iframe,
    Positional,
}

#[derive(Debug, Clone, Copy, Default)]
struct MethodTally {
    attempts: u64,
    successes: u64,
    last_success_at: Option<Instant>,
}

/// The mutable counter block for one hostname. Invalidation sentinel for
/// the suggested-delay cache is `cached_delay_ms < 0`.
struct DomainRecord {
    request_count: u64,
    success_count: u64,
    error_count: u64,
    rate_limited_count: u64,
    total_latency_ms: u64,
    last_rate_limited_at: Option<Instant>,
    robots_crawl_delay_ms: Option<u64>,
    manual_override_ms: Option<u64>,
    methods: HashMap<Method, MethodTally>,
    cached_delay_ms: i64,
    cached_at: Option<Instant>,
    last_accessed: Instant,
}

impl DomainRecord {
    fn new() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            error_count: 0,
            rate_limited_count: 0,
            total_latency_ms: 0,
            last_rate_limited_at: None,
            robots_crawl_delay_ms: None,
            manual_override_ms: None,
            methods: HashMap::new(),
            cached_delay_ms: -1,
            cached_at: None,
            last_accessed: Instant::now(),
        }
    }

    fn invalidate_cache(&mut self) {
        self.cached_delay_ms = -1;
        self.cached_at = None;
    }

    fn maybe_reset_for_overflow(&mut self) {
        let near_overflow = self.request_count >= OVERFLOW_THRESHOLD
            || self.success_count >= OVERFLOW_THRESHOLD
            || self.error_count >= OVERFLOW_THRESHOLD
            || self.rate_limited_count >= OVERFLOW_THRESHOLD
            || self.total_latency_ms >= OVERFLOW_THRESHOLD
            || self
                .methods
                .values()
                .any(|m| m.attempts >= OVERFLOW_THRESHOLD || m.successes >= OVERFLOW_THRESHOLD);
        if !near_overflow {
            return;
        }
        tracing::warn!("domain stats counter block approaching overflow, resetting atomically");
        self.request_count = 0;
        self.success_count = 0;
        self.error_count = 0;
        self.rate_limited_count = 0;
        self.total_latency_ms = 0;
        self.last_rate_limited_at = None;
        self.methods.clear();
        self.invalidate_cache();
    }

    /// Pure function of the record's current state (§4.4 Suggested delay
    /// algorithm, steps 1-9). Does not consult or update the cache — callers
    /// decide when to recompute.
    fn compute_delay_ms(&self, min_delay_ms: u64, max_delay_ms: u64) -> u64 {
        if self.request_count == 0 {
            return min_delay_ms;
        }

        let avg_latency = self.total_latency_ms as f64 / self.request_count as f64;
        let avg_latency = if avg_latency.is_finite() { avg_latency } else { 0.0 };

        let mut base = avg_latency / 2.0;

        let error_rate = self.error_count as f64 / self.request_count as f64;
        base *= 1.0 + 5.0 * error_rate;

        let rate_limited_fraction = self.rate_limited_count as f64 / self.request_count as f64;
        if rate_limited_fraction > 0.05 {
            base *= 2.0;
        }

        if let Some(last) = self.last_rate_limited_at {
            let minutes = last.elapsed().as_secs_f64() / 60.0;
            if minutes < 5.0 {
                let decayed = 10_000.0 * 0.5_f64.powf(minutes / 2.5);
                base = base.max(decayed);
            }
        }

        if let Some(crawl_delay_ms) = self.robots_crawl_delay_ms {
            base = base.max(crawl_delay_ms as f64);
        }

        if let Some(override_ms) = self.manual_override_ms {
            base = base.max(override_ms as f64);
        }

        let clamped = base.clamp(min_delay_ms as f64, max_delay_ms as f64);
        clamped as u64
    }

    /// The method holding this domain's single most recent success, if any
    /// method has succeeded at all. Ties (identical timestamps) resolve to
    /// whichever `HashMap` iteration sees first, which cannot happen under
    /// `Instant`'s monotonic resolution in practice.
    fn most_recent_success_method(&self) -> Option<Method> {
        self.methods
            .iter()
            .filter_map(|(&method, tally)| tally.last_success_at.map(|at| (method, at)))
            .max_by_key(|&(_, at)| at)
            .map(|(method, _)| method)
    }

    /// Negative-reinforcement scoring for one method (§4.4 Method ordering).
    fn method_score(&self, method: Method) -> f64 {
        let Some(tally) = self.methods.get(&method) else {
            return 0.5;
        };
        if tally.attempts == 0 {
            return 0.5;
        }
        if tally.successes == 0 {
            let failures = tally.attempts;
            return -0.1 * (failures.min(10) as f64);
        }
        let success_rate = tally.successes as f64 / tally.attempts as f64;
        let recent_bonus = match tally.last_success_at {
            Some(at)
                if at.elapsed() < Duration::from_secs(3600)
                    && self.most_recent_success_method() == Some(method) =>
            {
                0.5
            }
            _ => 0.0,
        };
        success_rate + recent_bonus
    }

    fn ordered_methods(&self) -> Vec<Method> {
        let mut scored: Vec<(Method, f64)> =
            METHODS.iter().map(|&m| (m, self.method_score(m))).collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(m, _)| m).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOutcome {
    pub latency: Duration,
    pub success: bool,
    pub rate_limited: bool,
}

/// Configuration bounds for the suggested-delay algorithm and the record
/// map's capacity/eviction policy (§4.4).
#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub cache_ttl: Duration,
    pub max_domains: usize,
    pub eviction_batch: usize,
    pub idle_eviction_interval: Duration,
    pub idle_eviction_threshold: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(5),
            max_domains: 10_000,
            eviction_batch: 100,
            idle_eviction_interval: Duration::from_secs(5 * 60),
            idle_eviction_threshold: Duration::from_secs(30 * 60),
        }
    }
}

/// Owns the hostname→record map and the idle-eviction background loop.
pub struct DomainStats {
    config: StatsConfig,
    records: StdMutex<HashMap<String, Arc<StdMutex<DomainRecord>>>>,
    stop: wraith_browser::StopSignal,
    cleaner: AsyncMutex<Option<JoinHandle<()>>>,
}

impl DomainStats {
    pub fn new(config: StatsConfig) -> Arc<Self> {
        let stats = Arc::new(Self {
            config,
            records: StdMutex::new(HashMap::new()),
            stop: wraith_browser::StopSignal::new(),
            cleaner: AsyncMutex::new(None),
        });
        stats.clone().spawn_idle_evictor();
        stats
    }

    fn spawn_idle_evictor(self: Arc<Self>) {
        let stats = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(stats.config.idle_eviction_interval);
            loop {
                tokio::select! {
                    _ = stats.stop.cancelled() => break,
                    _ = ticker.tick() => stats.evict_idle(),
                }
            }
        });
        match self.cleaner.try_lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(_) => {
                tokio::spawn(async move {
                    *self.cleaner.lock().await = Some(handle);
                });
            }
        }
    }

    fn record_for(&self, domain: &str) -> Arc<StdMutex<DomainRecord>> {
        let mut records = self.records.lock().expect("stats map mutex poisoned");
        if let Some(existing) = records.get(domain) {
            return existing.clone();
        }

        if records.len() >= self.config.max_domains {
            self.evict_lru_locked(&mut records);
        }

        let record = Arc::new(StdMutex::new(DomainRecord::new()));
        records.insert(domain.to_string(), record.clone());
        record
    }

    /// Batch-evicts the `eviction_batch` least-recently-accessed records
    /// while already holding the map lock (§4.4 batch LRU eviction).
    fn evict_lru_locked(&self, records: &mut HashMap<String, Arc<StdMutex<DomainRecord>>>) {
        let mut by_last_access: Vec<(String, Instant)> = records
            .iter()
            .map(|(host, rec)| {
                let last_accessed = rec.lock().expect("domain record mutex poisoned").last_accessed;
                (host.clone(), last_accessed)
            })
            .collect();
        by_last_access.sort_by_key(|(_, last_accessed)| *last_accessed);
        for (host, _) in by_last_access.into_iter().take(self.config.eviction_batch) {
            records.remove(&host);
        }
    }

    fn evict_idle(&self) {
        let threshold = self.config.idle_eviction_threshold;
        let mut records = self.records.lock().expect("stats map mutex poisoned");
        records.retain(|_, rec| {
            rec.lock().expect("domain record mutex poisoned").last_accessed.elapsed() <= threshold
        });
    }

    /// Record the outcome of a completed request against `domain` and
    /// invalidate its cached delay (§4.4 "cache must be invalidated on
    /// every write").
    pub fn record_request(&self, domain: &str, outcome: RequestOutcome) {
        let record = self.record_for(domain);
        let mut rec = record.lock().expect("domain record mutex poisoned");
        rec.last_accessed = Instant::now();
        rec.request_count += 1;
        rec.total_latency_ms += outcome.latency.as_millis() as u64;
        if outcome.success {
            rec.success_count += 1;
        } else {
            rec.error_count += 1;
        }
        if outcome.rate_limited {
            rec.rate_limited_count += 1;
            rec.last_rate_limited_at = Some(Instant::now());
        }
        rec.maybe_reset_for_overflow();
        rec.invalidate_cache();
    }

    pub fn record_method_attempt(&self, domain: &str, method: Method, success: bool) {
        let record = self.record_for(domain);
        let mut rec = record.lock().expect("domain record mutex poisoned");
        rec.last_accessed = Instant::now();
        let tally = rec.methods.entry(method).or_default();
        tally.attempts += 1;
        if success {
            tally.successes += 1;
            tally.last_success_at = Some(Instant::now());
        }
        rec.maybe_reset_for_overflow();
        rec.invalidate_cache();
    }

    pub fn set_robots_crawl_delay(&self, domain: &str, delay: Duration) {
        let record = self.record_for(domain);
        let mut rec = record.lock().expect("domain record mutex poisoned");
        rec.robots_crawl_delay_ms = Some(delay.as_millis() as u64);
        rec.invalidate_cache();
    }

    pub fn set_manual_override(&self, domain: &str, delay: Duration) {
        let record = self.record_for(domain);
        let mut rec = record.lock().expect("domain record mutex poisoned");
        rec.manual_override_ms = Some(delay.as_millis() as u64);
        rec.invalidate_cache();
    }

    /// Suggested delay before the next request to `domain`, serving the
    /// 5 s cache when fresh (§4.4 step 9).
    pub fn suggested_delay(&self, domain: &str) -> Duration {
        let record = self.record_for(domain);
        let mut rec = record.lock().expect("domain record mutex poisoned");
        rec.last_accessed = Instant::now();

        if rec.cached_delay_ms >= 0 {
            if let Some(cached_at) = rec.cached_at {
                if cached_at.elapsed() < self.config.cache_ttl {
                    return Duration::from_millis(rec.cached_delay_ms as u64);
                }
            }
        }

        let delay_ms = rec.compute_delay_ms(
            self.config.min_delay.as_millis() as u64,
            self.config.max_delay.as_millis() as u64,
        );
        rec.cached_delay_ms = delay_ms as i64;
        rec.cached_at = Some(Instant::now());
        Duration::from_millis(delay_ms)
    }

    /// Challenge-solving methods ordered by descending score (§4.4 Method
    /// ordering).
    pub fn method_order(&self, domain: &str) -> Vec<Method> {
        let record = self.record_for(domain);
        let rec = record.lock().expect("domain record mutex poisoned");
        rec.ordered_methods()
    }

    pub fn domain_count(&self) -> usize {
        self.records.lock().expect("stats map mutex poisoned").len()
    }

    pub async fn close(&self) {
        self.stop.fire();
        if let Some(handle) = self.cleaner.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_requests_returns_min_delay() {
        let rec = DomainRecord::new();
        assert_eq!(rec.compute_delay_ms(500, 30_000), 500);
    }

    #[test]
    fn error_rate_scales_base_delay() {
        let mut rec = DomainRecord::new();
        rec.request_count = 10;
        rec.error_count = 2; // 20% error rate -> 2x
        rec.total_latency_ms = 1000; // avg latency 100ms, base = 50ms
        let delay = rec.compute_delay_ms(1, 30_000);
        assert_eq!(delay, 100);
    }

    #[test]
    fn method_learning_matches_documented_scenario() {
        let mut rec = DomainRecord::new();
        rec.methods.insert(
            Method::Shadow,
            MethodTally { attempts: 10, successes: 0, last_success_at: None },
        );
        rec.methods.insert(
            Method::Wait,
            MethodTally { attempts: 2, successes: 1, last_success_at: Some(Instant::now()) },
        );
        let order = rec.ordered_methods();
        let wait_pos = order.iter().position(|&m| m == Method::Wait).unwrap();
        let shadow_pos = order.iter().position(|&m| m == Method::Shadow).unwrap();
        assert!(wait_pos < shadow_pos);
        // untried methods (+0.5) all outrank shadow's -1.0
        for untried in [Method::Keyboard, Method::Widget, Method::Iframe, Method::Positional] {
            let untried_pos = order.iter().position(|&m| m == untried).unwrap();
            assert!(untried_pos < shadow_pos);
        }
    }

    #[test]
    fn shadow_score_capped_after_ten_failures() {
        let mut rec = DomainRecord::new();
        rec.methods.insert(
            Method::Shadow,
            MethodTally { attempts: 20, successes: 0, last_success_at: None },
        );
        assert_eq!(rec.method_score(Method::Shadow), -1.0);
        let order = rec.ordered_methods();
        assert_eq!(order.last(), Some(&Method::Shadow));
    }

    #[test]
    fn recency_bonus_goes_only_to_most_recent_success() {
        let mut rec = DomainRecord::new();
        let now = Instant::now();
        rec.methods.insert(
            Method::Wait,
            MethodTally { attempts: 4, successes: 4, last_success_at: Some(now) },
        );
        rec.methods.insert(
            Method::Shadow,
            MethodTally {
                attempts: 4,
                successes: 4,
                last_success_at: Some(now - Duration::from_secs(60)),
            },
        );
        // both methods succeeded every time and both are under an hour old,
        // but only Wait holds the domain's single most recent success.
        assert_eq!(rec.method_score(Method::Wait), 1.5);
        assert_eq!(rec.method_score(Method::Shadow), 1.0);
    }

    #[test]
    fn cache_invalidated_on_write() {
        let stats = DomainStats::new(StatsConfig {
            idle_eviction_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        let first = stats.suggested_delay("example.com");
        stats.record_request(
            "example.com",
            RequestOutcome { latency: Duration::from_millis(5000), success: true, rate_limited: false },
        );
        let second = stats.suggested_delay("example.com");
        assert_ne!(first, second);
    }
}
