//! Environment-driven configuration for the proxy service binary.
//!
//! The core crates (`wraith-pool`, `wraith-sessions`, `wraith-stats`, `wraith-api`)
//! never read `std::env` themselves — they are constructed from already-validated
//! structs. This crate is the one place that boundary touches the process
//! environment, and it owns the defaulting/clamping rules documented in the
//! service specification's boundary-behavior table.

use serde::{Deserialize, Serialize};
use std::time::Duration;

mod env;

pub use env::EnvError;

/// Bind address for the HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8191,
        }
    }
}

/// Inputs feeding [`wraith_pool::BrowserPoolConfig`](../wraith_pool/struct.BrowserPoolConfig.html).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub size: usize,
    pub acquire_timeout: Duration,
    pub max_memory_mb: u64,
    pub headless: bool,
    pub browser_binary_path: Option<String>,
    pub proxy_url: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub ignore_cert_errors: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            acquire_timeout: Duration::from_secs(30),
            max_memory_mb: 2048,
            headless: true,
            browser_binary_path: None,
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
            ignore_cert_errors: false,
        }
    }
}

/// Inputs feeding the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(60),
            max_sessions: 1000,
        }
    }
}

/// Inputs feeding the per-IP token-bucket rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 120,
            trust_proxy: false,
        }
    }
}

/// Inputs feeding the API-key middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
        }
    }
}

/// CORS allow-list. Empty means "no CORS headers at all" (the secure default).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

/// Fully assembled, validated configuration for the binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub sessions: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub cors: CorsConfig,
}

impl AppConfig {
    /// Load configuration, overriding defaults from the environment, then validate.
    pub fn load() -> Result<Self, EnvError> {
        let mut cfg = Self::default();
        env::apply(&mut cfg)?;
        cfg.validate();
        Ok(cfg)
    }

    /// Clamp every field into the bounds the specification documents. This never
    /// fails — out-of-range inputs are silently corrected, matching the teacher
    /// lineage's `validate() -> Result<(), String>` pattern except that here the
    /// documented behavior for every field is "clamp", not "reject".
    pub fn validate(&mut self) {
        if self.server.port == 0 {
            self.server.port = ServerConfig::default().port;
        }

        if self.pool.size < 1 {
            self.pool.size = 3;
        } else if self.pool.size > 20 {
            self.pool.size = 20;
        }

        let min_acquire = Duration::from_secs(1);
        let max_acquire = Duration::from_secs(5 * 60);
        if self.pool.acquire_timeout < min_acquire {
            self.pool.acquire_timeout = min_acquire;
        } else if self.pool.acquire_timeout > max_acquire {
            self.pool.acquire_timeout = max_acquire;
        }

        self.pool.max_memory_mb = self.pool.max_memory_mb.clamp(256, 16384);

        let min_ttl = Duration::from_secs(60);
        let max_ttl = Duration::from_secs(24 * 60 * 60);
        self.sessions.ttl = self.sessions.ttl.clamp(min_ttl, max_ttl);

        let min_cleanup = Duration::from_secs(10);
        let max_cleanup = Duration::from_secs(60 * 60);
        self.sessions.cleanup_interval = self.sessions.cleanup_interval.clamp(min_cleanup, max_cleanup);
        if self.sessions.cleanup_interval >= self.sessions.ttl {
            self.sessions.cleanup_interval = self.sessions.ttl / 2;
        }

        self.sessions.max_sessions = self.sessions.max_sessions.clamp(1, 10_000);

        self.rate_limit.requests_per_minute = self.rate_limit.requests_per_minute.clamp(1, 10_000);

        if let Some(key) = &self.auth.api_key {
            let valid = (16..=256).contains(&key.len())
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                tracing::warn!("configured api key fails length/charset validation, disabling auth");
                self.auth.enabled = false;
                self.auth.api_key = None;
            }
        } else if self.auth.enabled {
            self.auth.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_zero_falls_back_to_default() {
        let mut cfg = AppConfig {
            server: ServerConfig { host: "0.0.0.0".into(), port: 0 },
            ..Default::default()
        };
        cfg.validate();
        assert_eq!(cfg.server.port, 8191);
    }

    #[test]
    fn pool_size_is_clamped() {
        let mut low = AppConfig { pool: PoolConfig { size: 0, ..Default::default() }, ..Default::default() };
        low.validate();
        assert_eq!(low.pool.size, 3);

        let mut high = AppConfig { pool: PoolConfig { size: 99, ..Default::default() }, ..Default::default() };
        high.validate();
        assert_eq!(high.pool.size, 20);
    }

    #[test]
    fn cleanup_interval_must_be_shorter_than_ttl() {
        let mut cfg = AppConfig {
            sessions: SessionConfig {
                ttl: Duration::from_secs(60),
                cleanup_interval: Duration::from_secs(120),
                max_sessions: 10,
            },
            ..Default::default()
        };
        cfg.validate();
        assert!(cfg.sessions.cleanup_interval < cfg.sessions.ttl);
    }

    #[test]
    fn malformed_api_key_disables_auth() {
        let mut cfg = AppConfig {
            auth: AuthConfig { enabled: true, api_key: Some("short".into()) },
            ..Default::default()
        };
        cfg.validate();
        assert!(!cfg.auth.enabled);
        assert!(cfg.auth.api_key.is_none());
    }
}
