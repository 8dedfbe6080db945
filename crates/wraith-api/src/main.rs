//! Binary entry point: loads configuration, constructs every subsystem,
//! builds the production router, and serves until a shutdown signal
//! arrives, then drains C5 → C3 → C1 in order (§2, §4.6).
//!
//! Grounded on the teacher lineage's `riptide-api::main` for the overall
//! shape (tracing init first, then config, then subsystem construction,
//! then `axum::serve(..).with_graceful_shutdown(..)`), simplified to this
//! system's single env-filter/fmt subscriber since no OpenTelemetry
//! collector is part of this workspace's dependency stack.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use wraith_api::lifecycle;
use wraith_api::middleware::{self, AuthConfig, RateLimitConfig, RateLimiter};
use wraith_api::routes;
use wraith_api::{build_router, AppState};
use wraith_config::AppConfig;
use wraith_pool::{BrowserPool, BrowserPoolConfig};
use wraith_sessions::{SessionManager, SessionManagerConfig};
use wraith_stats::{DomainStats, StatsConfig};

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,chromiumoxide=warn".into());

    if std::env::var("WRAITH_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn pool_config_from(config: &AppConfig) -> BrowserPoolConfig {
    BrowserPoolConfig {
        size: config.pool.size,
        acquire_timeout: config.pool.acquire_timeout,
        max_memory_mb: config.pool.max_memory_mb,
        launch: wraith_browser::LaunchConfig {
            headless: config.pool.headless,
            binary_path: config.pool.browser_binary_path.clone(),
            ignore_cert_errors: config.pool.ignore_cert_errors,
            proxy_url: config.pool.proxy_url.clone(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn session_config_from(config: &AppConfig) -> SessionManagerConfig {
    SessionManagerConfig {
        ttl: config.sessions.ttl,
        cleanup_interval: config.sessions.cleanup_interval,
        max_sessions: config.sessions.max_sessions,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    middleware::install_panic_hook();
    routes::init_start_time();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting proxy service");

    let config = Arc::new(AppConfig::load().map_err(anyhow::Error::from)?);

    let pool = BrowserPool::new(pool_config_from(&config))
        .await
        .map_err(anyhow::Error::from)?;
    tracing::info!(size = config.pool.size, "browser pool ready");

    let sessions = SessionManager::new(pool.clone(), session_config_from(&config));
    let stats = DomainStats::new(StatsConfig::default());

    let rate_limiter = RateLimiter::new(RateLimitConfig {
        enabled: config.rate_limit.enabled,
        rate: config.rate_limit.requests_per_minute,
        trust_proxy: config.rate_limit.trust_proxy,
        ..Default::default()
    });

    let auth = AuthConfig::new(config.auth.enabled, config.auth.api_key.as_deref());

    let state = AppState::new(pool.clone(), sessions.clone(), stats, rate_limiter, auth, config.clone());

    // The command-dispatch surface that drives a browser per request is out
    // of scope (§1); the production router is mounted here as an empty
    // extension point behind the full middleware stack.
    let request_routes: Router<AppState> = Router::new();

    let app = build_router(state.clone(), request_routes, Duration::from_secs(30));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid bind address: {err}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(lifecycle::shutdown_signal())
    .await?;

    lifecycle::drain(Arc::new(state), Duration::from_secs(45)).await;

    tracing::info!("shutdown complete");
    Ok(())
}
