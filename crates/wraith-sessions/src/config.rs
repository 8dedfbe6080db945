use std::time::Duration;

/// Process-wide session manager configuration (§6, §4.3). Already validated
/// by the caller.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    pub max_sessions: usize,
    pub destroy_drain_timeout: Duration,
    pub cleanup_drain_timeout: Duration,
    pub close_concurrency: usize,
    pub max_page_refs: u64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(60),
            max_sessions: 1000,
            destroy_drain_timeout: Duration::from_secs(5),
            cleanup_drain_timeout: Duration::from_secs(2),
            close_concurrency: 4,
            max_page_refs: 100,
        }
    }
}
