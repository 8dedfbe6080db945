//! Shared application state threaded through every route and middleware
//! layer (§6 external interfaces, C1/C3/C4 wiring).
//!
//! Grounded on the teacher lineage's `riptide-api::state::AppState`: a
//! single `Clone`-able struct of `Arc`-wrapped subsystems passed to
//! `Router::with_state`, rather than a global.

use std::sync::Arc;
use wraith_config::AppConfig;
use wraith_pool::BrowserPool;
use wraith_sessions::SessionManager;
use wraith_stats::DomainStats;

use crate::middleware::auth::AuthConfig;
use crate::middleware::rate_limit::RateLimiter;

/// Everything a request handler or middleware layer needs. Cheap to clone —
/// every field is either an `Arc` or, for `auth`, a couple of small copyable
/// values.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<BrowserPool>,
    pub sessions: Arc<SessionManager>,
    pub stats: Arc<DomainStats>,
    pub rate_limiter: Arc<RateLimiter>,
    pub auth: AuthConfig,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        pool: Arc<BrowserPool>,
        sessions: Arc<SessionManager>,
        stats: Arc<DomainStats>,
        rate_limiter: Arc<RateLimiter>,
        auth: AuthConfig,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            pool,
            sessions,
            stats,
            rate_limiter,
            auth,
            config,
        }
    }
}
