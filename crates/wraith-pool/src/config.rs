use std::time::Duration;
use wraith_browser::LaunchConfig;

/// Process-wide pool configuration (§6, §4.1). Already validated by the
/// caller — this crate never reads the environment.
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    pub size: usize,
    pub acquire_timeout: Duration,
    pub max_memory_mb: u64,
    pub launch: LaunchConfig,
    pub max_age: Duration,
    pub memory_check_interval: Duration,
    pub health_check_interval: Duration,
    pub recycle_close_timeout: Duration,
    pub recycle_spawn_timeout: Duration,
    pub shutdown_loop_timeout: Duration,
    pub shutdown_close_task_timeout: Duration,
    pub recycle_concurrency: usize,
    pub close_concurrency: usize,
    pub max_acquire_retries: u32,
    pub leaked_close_task_warn_threshold: u64,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            acquire_timeout: Duration::from_secs(30),
            max_memory_mb: 2048,
            launch: LaunchConfig::default(),
            max_age: Duration::from_secs(30 * 60),
            memory_check_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            recycle_close_timeout: Duration::from_secs(10),
            recycle_spawn_timeout: Duration::from_secs(30),
            shutdown_loop_timeout: Duration::from_secs(30),
            shutdown_close_task_timeout: Duration::from_secs(15),
            recycle_concurrency: 4,
            close_concurrency: 4,
            max_acquire_retries: 5,
            leaked_close_task_warn_threshold: 10,
        }
    }
}
