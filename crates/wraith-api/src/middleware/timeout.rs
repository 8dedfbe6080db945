//! Deadline enforcement that never cancels the handler task (§4.5 Timeout).
//!
//! Grounded on the teacher lineage's `riptide-api::sessions::middleware::
//! SessionLayer`/`SessionMiddleware` custom `tower::Layer`/`Service` pair.
//! Unlike a plain `tower_http::timeout::TimeoutLayer`, which drops the
//! inner future (and with it, the in-flight handler) on deadline, this
//! layer spawns the handler onto its own task and races a sleep against
//! that task's completion. On deadline it returns the 504 body immediately
//! and detaches from the task rather than aborting it, so a handler that
//! is mid-acquire on a browser is expected to notice cancellation of its
//! own context cooperatively rather than being killed outright.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

use crate::error::ErrorBody;

#[derive(Clone)]
pub struct TimeoutLayer {
    duration: Duration,
}

impl TimeoutLayer {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutMiddleware {
            inner,
            duration: self.duration,
        }
    }
}

#[derive(Clone)]
pub struct TimeoutMiddleware<S> {
    inner: S,
    duration: Duration,
}

impl<S> Service<Request> for TimeoutMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let duration = self.duration;
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let handler = tokio::spawn(async move { inner.call(request).await });

            tokio::select! {
                biased;
                result = handler => match result {
                    Ok(response) => response,
                    Err(_join_err) => Ok(timed_out_response()),
                },
                _ = tokio::time::sleep(duration) => {
                    tracing::warn!(timeout_ms = duration.as_millis() as u64, "request timed out, handler detached");
                    Ok(timed_out_response())
                }
            }
        })
    }
}

fn timed_out_response() -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        axum::Json(ErrorBody::now("request timed out")),
    )
        .into_response()
}

/// Shared timeout config, kept alongside the pool/session timeouts so the
/// binary can cross-check `default <= max` at startup (§8 boundary table).
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeoutConfig {
    pub default_timeout: Duration,
    pub max_timeout: Duration,
}

impl RequestTimeoutConfig {
    pub fn new(default_timeout: Duration, max_timeout: Duration) -> Self {
        if default_timeout > max_timeout {
            Self {
                default_timeout: max_timeout,
                max_timeout,
            }
        } else {
            Self {
                default_timeout,
                max_timeout,
            }
        }
    }
}

impl Default for RequestTimeoutConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(120))
    }
}

pub fn layer_for(config: Arc<RequestTimeoutConfig>) -> TimeoutLayer {
    TimeoutLayer::new(config.default_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn fast_handler_completes_normally() {
        let app = Router::new()
            .route("/fast", get(|| async { "ok" }))
            .layer(TimeoutLayer::new(Duration::from_millis(200)));

        let response = app
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn slow_handler_produces_504_without_blocking_the_caller() {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "too late"
                }),
            )
            .layer(TimeoutLayer::new(Duration::from_millis(30)));

        let start = std::time::Instant::now();
        let response = app
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn default_above_max_is_clamped_down() {
        let cfg = RequestTimeoutConfig::new(Duration::from_secs(200), Duration::from_secs(120));
        assert_eq!(cfg.default_timeout, Duration::from_secs(120));
    }
}
