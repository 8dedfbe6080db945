//! Environment-variable overrides for [`crate::AppConfig`].
//!
//! Mirrors the teacher lineage's `from_env()` convention: every field has a
//! documented env var, parse failures are logged and the default is kept
//! rather than aborting startup.

use crate::AppConfig;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment variable {0} has an invalid value: {1}")]
    InvalidValue(&'static str, String),
}

pub fn apply(cfg: &mut AppConfig) -> Result<(), EnvError> {
    if let Some(v) = var("WRAITH_HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = parse::<u16>("WRAITH_PORT")? {
        cfg.server.port = v;
    }

    if let Some(v) = parse::<usize>("WRAITH_POOL_SIZE")? {
        cfg.pool.size = v;
    }
    if let Some(v) = parse_secs("WRAITH_POOL_ACQUIRE_TIMEOUT_SECS")? {
        cfg.pool.acquire_timeout = v;
    }
    if let Some(v) = parse::<u64>("WRAITH_POOL_MAX_MEMORY_MB")? {
        cfg.pool.max_memory_mb = v;
    }
    if let Some(v) = parse::<bool>("WRAITH_POOL_HEADLESS")? {
        cfg.pool.headless = v;
    }
    cfg.pool.browser_binary_path = var("WRAITH_BROWSER_BINARY_PATH").or_else(|| cfg.pool.browser_binary_path.clone());
    cfg.pool.proxy_url = var("WRAITH_PROXY_URL").or_else(|| cfg.pool.proxy_url.clone());
    cfg.pool.proxy_username = var("WRAITH_PROXY_USERNAME").or_else(|| cfg.pool.proxy_username.clone());
    cfg.pool.proxy_password = var("WRAITH_PROXY_PASSWORD").or_else(|| cfg.pool.proxy_password.clone());
    if let Some(v) = parse::<bool>("WRAITH_IGNORE_CERT_ERRORS")? {
        cfg.pool.ignore_cert_errors = v;
    }

    if let Some(v) = parse_secs("WRAITH_SESSION_TTL_SECS")? {
        cfg.sessions.ttl = v;
    }
    if let Some(v) = parse_secs("WRAITH_SESSION_CLEANUP_INTERVAL_SECS")? {
        cfg.sessions.cleanup_interval = v;
    }
    if let Some(v) = parse::<usize>("WRAITH_SESSION_MAX")? {
        cfg.sessions.max_sessions = v;
    }

    if let Some(v) = parse::<bool>("WRAITH_RATE_LIMIT_ENABLED")? {
        cfg.rate_limit.enabled = v;
    }
    if let Some(v) = parse::<u32>("WRAITH_RATE_LIMIT_RPM")? {
        cfg.rate_limit.requests_per_minute = v;
    }
    if let Some(v) = parse::<bool>("WRAITH_TRUST_PROXY")? {
        cfg.rate_limit.trust_proxy = v;
    }

    if let Some(v) = parse::<bool>("WRAITH_AUTH_ENABLED")? {
        cfg.auth.enabled = v;
    }
    cfg.auth.api_key = var("WRAITH_API_KEY").or_else(|| cfg.auth.api_key.clone());

    if let Some(v) = var("WRAITH_CORS_ALLOWED_ORIGINS") {
        cfg.cors.allowed_origins = v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    Ok(())
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse<T>(name: &'static str) -> Result<Option<T>, EnvError>
where
    T: std::str::FromStr,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| EnvError::InvalidValue(name, raw)),
        None => Ok(None),
    }
}

fn parse_secs(name: &'static str) -> Result<Option<Duration>, EnvError> {
    Ok(parse::<u64>(name)?.map(Duration::from_secs))
}
