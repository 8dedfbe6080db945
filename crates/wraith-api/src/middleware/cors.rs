//! CORS with an explicit allow-list and no wildcard (§4.5 CORS).
//!
//! Grounded on the teacher lineage's `riptide-api::security_config`, which
//! carries a `cors_allowed_origins: Vec<String>` allow-list; generalized
//! here into a standalone middleware (rather than `tower_http::CorsLayer`)
//! so that an empty allow-list deterministically emits no CORS headers at
//! all, and a match always echoes the literal request origin, never `*`.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

pub async fn cors_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let allowed = &state.config.cors.allowed_origins;
    let origin = request
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let matched = origin
        .as_deref()
        .filter(|o| allowed.iter().any(|allowed_origin| allowed_origin == o))
        .map(|o| o.to_string());

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_headers(&mut response, matched.as_deref());
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, matched.as_deref());
    response
}

fn apply_headers(response: &mut Response, matched_origin: Option<&str>) {
    let Some(origin) = matched_origin else {
        return;
    };
    let Ok(value) = HeaderValue::from_str(origin) else {
        return;
    };
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", value);
    headers.insert("vary", HeaderValue::from_static("Origin"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type, X-API-Key"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_never_matches() {
        let allowed: Vec<String> = vec![];
        let origin = "https://example.com";
        assert!(!allowed.iter().any(|a| a == origin));
    }

    #[test]
    fn literal_match_required() {
        let allowed = vec!["https://example.com".to_string()];
        assert!(allowed.iter().any(|a| a == "https://example.com"));
        assert!(!allowed.iter().any(|a| a == "https://evil.example.com"));
    }
}
