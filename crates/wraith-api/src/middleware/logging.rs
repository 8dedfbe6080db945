//! Structured per-request access logging (§4.5 Logging, §10.1).
//!
//! Grounded on the teacher lineage's `riptide-api::middleware::pii_redaction`
//! for the "wrap and inspect after the inner service runs" shape, adapted
//! to emit a single `tracing` event per request instead of touching the
//! response body.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::time::Instant;

use crate::middleware::client_ip;
use crate::state::AppState;

const SENSITIVE_QUERY_KEYS: &[&str] = &["api_key", "apikey", "token", "password", "secret"];

pub async fn logging_middleware(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let peer = client_ip::from_connect_info(connect_info.as_ref());
    let ip = client_ip::derive(request.headers(), peer, state.config.rate_limit.trust_proxy);
    let masked_client = ip.map(client_ip::mask_for_log).unwrap_or_else(|| "unknown".to_string());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16();
    let sanitized_path = sanitize_url(&uri);

    tracing::info!(
        method = %method,
        path = %sanitized_path,
        client = %masked_client,
        status,
        duration_ms = duration.as_millis() as u64,
        "request completed"
    );

    response
}

/// Replace the value of any sensitive query-parameter with `[REDACTED]`,
/// leaving the key and path untouched.
fn sanitize_url(uri: &axum::http::Uri) -> String {
    let path = uri.path();
    let Some(query) = uri.query() else {
        return path.to_string();
    };

    let sanitized: Vec<String> = query
        .split('&')
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let is_sensitive = SENSITIVE_QUERY_KEYS
                .iter()
                .any(|sensitive| sensitive.eq_ignore_ascii_case(key));
            if is_sensitive {
                format!("{key}=[REDACTED]")
            } else {
                pair.to_string()
            }
        })
        .collect();

    format!("{path}?{}", sanitized.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_sensitive_query_params() {
        let uri: axum::http::Uri = "/scrape?url=https://x.test&api_key=super-secret".parse().unwrap();
        let sanitized = sanitize_url(&uri);
        assert_eq!(sanitized, "/scrape?url=https://x.test&api_key=[REDACTED]");
    }

    #[test]
    fn leaves_non_sensitive_query_untouched() {
        let uri: axum::http::Uri = "/scrape?url=https://x.test&format=json".parse().unwrap();
        assert_eq!(sanitize_url(&uri), "/scrape?url=https://x.test&format=json");
    }

    #[test]
    fn path_without_query_is_unchanged() {
        let uri: axum::http::Uri = "/health".parse().unwrap();
        assert_eq!(sanitize_url(&uri), "/health");
    }
}
