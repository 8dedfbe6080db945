//! Request-serving middleware stack (C5, §4.5).
//!
//! Composed outer-to-inner in `lib.rs` as: Recovery → Logging → RateLimit →
//! APIKey → SecurityHeaders → CORS → handler.

pub mod auth;
pub mod client_ip;
pub mod cors;
pub mod logging;
pub mod rate_limit;
pub mod recovery;
pub mod security_headers;
pub mod timeout;

pub use auth::{api_key_middleware, AuthConfig};
pub use cors::cors_middleware;
pub use logging::logging_middleware;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimiter};
pub use recovery::{install_panic_hook, recovery_middleware};
pub use security_headers::security_headers_middleware;
pub use timeout::{RequestTimeoutConfig, TimeoutLayer};
