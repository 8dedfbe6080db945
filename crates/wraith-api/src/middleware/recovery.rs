//! Panic recovery (§4.5 Recovery).
//!
//! Catches a panicking handler with `futures::FutureExt::catch_unwind`,
//! emits a sanitized stack description (file paths reduced to basenames —
//! never log an absolute filesystem path derived from a panic location),
//! and renders the standard error body. If the handler had already started
//! writing its response, nothing further is written.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

use crate::error::ErrorBody;

pub async fn recovery_middleware(request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(&panic);
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(ErrorBody::now(message))).into_response()
        }
    }
}

/// Installs a process-wide panic hook that logs through `tracing` instead of
/// stderr, with the panic location's file path reduced to a basename so a
/// recovered handler panic never leaks the host's directory layout into
/// logs. Call once from the binary entry point before serving traffic.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", basename(loc.file()), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(location = %location, panic = %info, "handler panicked, recovered");
    }));
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal server error".to_string()
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn recovers_from_panicking_handler() {
        let app = Router::new()
            .route("/boom", get(|| async { panic!("kaboom") as String }))
            .layer(axum::middleware::from_fn(recovery_middleware));

        let response = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn basename_strips_directory_components() {
        assert_eq!(basename("/root/crate/src/handler.rs"), "handler.rs");
        assert_eq!(basename("handler.rs"), "handler.rs");
    }
}
