//! Constant-time API-key authentication (§4.5 APIKey).
//!
//! Grounded on the teacher lineage's `riptide-api::middleware::auth`
//! (header extraction, public-path allow-list) generalized to the
//! specification's stricter contract: header-only (no query-parameter
//! fallback, no Bearer-token alias) and a SHA-256 digest compared in
//! constant time so comparison cost is independent of key length.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Precomputed SHA-256 digest of the configured key. Never store the
    /// plaintext key alongside the comparison path.
    pub(crate) expected_hash: Option<[u8; 32]>,
}

impl AuthConfig {
    pub fn new(enabled: bool, api_key: Option<&str>) -> Self {
        Self {
            enabled: enabled && api_key.is_some(),
            expected_hash: api_key.map(hash),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            expected_hash: None,
        }
    }
}

pub fn hash(key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// Constant-time byte comparison: always walks the full length of `expected`
/// regardless of where `actual` first differs, so timing does not leak how
/// many leading bytes matched.
fn constant_time_eq(expected: &[u8; 32], actual: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(actual.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/health" || path == "/metrics" {
        return next.run(request).await;
    }

    if !state.auth.enabled {
        return next.run(request).await;
    }

    let Some(expected_hash) = state.auth.expected_hash else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    let authorized = match provided {
        Some(key) => constant_time_eq(&expected_hash, &hash(key)),
        None => false,
    };

    if !authorized {
        return ApiError::Unauthorized.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn constant_time_eq_matches_equal_hashes() {
        let h = hash("a-valid-key-of-reasonable-length");
        assert!(constant_time_eq(&h, &h));
    }

    #[test]
    fn constant_time_eq_rejects_mismatch() {
        let a = hash("key-one-abcdefghijklmno");
        let b = hash("key-two-abcdefghijklmno");
        assert!(!constant_time_eq(&a, &b));
    }

    /// Statistical sanity check (§10.4): comparison time should not scale
    /// with how many leading bytes of the provided key match the real one.
    /// Generous bounds to avoid flakiness on shared CI hardware.
    #[test]
    fn comparison_time_is_not_strongly_correlated_with_match_length() {
        let real = "x".repeat(64);
        let expected = hash(&real);
        let near_miss = format!("{}y", &real[..63]);
        let far_miss = "z".repeat(64);
        const TRIALS: u32 = 2000;

        let mut near_miss_total = Duration::ZERO;
        let mut far_miss_total = Duration::ZERO;
        for _ in 0..TRIALS {
            let start = Instant::now();
            let _ = constant_time_eq(&expected, &hash(&near_miss));
            near_miss_total += start.elapsed();

            let start = Instant::now();
            let _ = constant_time_eq(&expected, &hash(&far_miss));
            far_miss_total += start.elapsed();
        }

        let near_avg = near_miss_total.as_nanos() as f64 / TRIALS as f64;
        let far_avg = far_miss_total.as_nanos() as f64 / TRIALS as f64;
        let ratio = (near_avg - far_avg).abs() / far_avg.max(1.0);
        assert!(
            ratio < 0.5,
            "comparison time diverged too much between near/far mismatches: {ratio}"
        );
    }
}
