//! The guaranteed HTTP surface (§6): `/health` and `/metrics`. Both bypass
//! auth unconditionally (enforced in `middleware::auth`) and never touch
//! the browser pool directly, so they stay cheap under load.
//!
//! Grounded on the teacher lineage's `riptide-api::handlers::health`
//! (startup-time uptime tracking, JSON health document) generalized down
//! to this system's smaller dependency surface, and on §10.5's decision to
//! back `/metrics` with the counters §3's data model already requires to
//! exist rather than a Prometheus exposition format.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::state::AppState;

static START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

pub async fn health() -> impl IntoResponse {
    let uptime_secs = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    Json(HealthBody {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs,
    })
}

#[derive(Serialize)]
struct PoolMetrics {
    available: usize,
    acquired: u64,
    released: u64,
    recycled: u64,
    errors: u64,
    leaked_close_tasks: u64,
}

#[derive(Serialize)]
struct MetricsBody {
    pool: PoolMetrics,
    active_sessions: usize,
    rate_limited_clients: usize,
    domains_tracked: usize,
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let pool_stats = state.pool.stats();
    Json(MetricsBody {
        pool: PoolMetrics {
            available: pool_stats.available,
            acquired: pool_stats.acquired,
            released: pool_stats.released,
            recycled: pool_stats.recycled,
            errors: pool_stats.errors,
            leaked_close_tasks: pool_stats.leaked_close_tasks,
        },
        active_sessions: state.sessions.active_sessions(),
        rate_limited_clients: state.rate_limiter.client_count(),
        domains_tracked: state.stats.domain_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_reports_ok() {
        init_start_time();
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
