//! The HTTP-facing half of the proxy service: middleware stack (C5),
//! lifecycle coordination (C6), and the guaranteed `/health` + `/metrics`
//! surface (§6). The command-dispatch layer that actually drives a browser
//! per request is out of scope (§1) — this crate only builds the request
//! pipeline such a layer would be mounted behind.

pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ErrorBody};
pub use state::AppState;

/// Assemble the production router: the guaranteed `/health` and `/metrics`
/// routes, plus whatever nested router the caller supplies for the
/// command-dispatch surface, wrapped in the full middleware stack in the
/// documented order (§4.5): Recovery → Logging → RateLimit → APIKey →
/// SecurityHeaders → CORS → Timeout → handler.
///
/// `Timeout` is applied as a `tower::Layer` (innermost, directly around the
/// handler router) rather than an `axum::middleware::from_fn` layer,
/// because it needs `tower::Service::call` access to spawn the inner
/// service as a detached task (see `middleware::timeout`).
pub fn build_router(state: AppState, request_routes: Router<AppState>, request_timeout: Duration) -> Router {
    let request_routes = request_routes.layer(middleware::TimeoutLayer::new(request_timeout));

    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .merge(request_routes)
        .layer(from_fn_with_state(state.clone(), middleware::cors_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::security_headers_middleware,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::api_key_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::logging_middleware))
        .layer(axum::middleware::from_fn(middleware::recovery_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;
    use wraith_config::AppConfig;
    use wraith_pool::{BrowserPool, BrowserPoolConfig};
    use wraith_sessions::{SessionManager, SessionManagerConfig};
    use wraith_stats::{DomainStats, StatsConfig};

    async fn test_state() -> AppState {
        let pool = BrowserPool::new(BrowserPoolConfig {
            size: 0,
            ..Default::default()
        })
        .await
        .expect("pool with zero pre-warmed browsers always constructs");
        let sessions = SessionManager::new(pool.clone(), SessionManagerConfig::default());
        let stats = DomainStats::new(StatsConfig::default());
        let rate_limiter = middleware::RateLimiter::new(middleware::RateLimitConfig {
            enabled: false,
            ..Default::default()
        });
        let auth = middleware::AuthConfig::disabled();
        AppState::new(pool, sessions, stats, rate_limiter, auth, Arc::new(AppConfig::default()))
    }

    #[tokio::test]
    async fn health_and_metrics_bypass_auth_and_rate_limit() {
        let state = test_state().await;
        let app = build_router(state, Router::new(), Duration::from_secs(30));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_404s_without_panicking() {
        let state = test_state().await;
        let app = build_router(state, Router::new(), Duration::from_secs(30));

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
