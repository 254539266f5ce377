//! Middleware modules for the Grantflow API
//!
//! - `auth`: credential verification and organization membership
//! - `rate_limit`: per-IP and per-organization request quotas
//!
//! # Middleware Order
//!
//! Rate limiting is keyed by organization once a caller is authenticated,
//! so it must sit inside the auth layer:
//!
//! ```ignore
//! Router::new()
//!     .route("/api/v1/grants", get(handler))
//!     .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
//!     .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
//! ```

mod auth;
mod rate_limit;

pub use auth::{auth_middleware, AuthExtractor, AuthMiddlewareError, AuthMiddlewareState};
pub use rate_limit::{rate_limit_middleware, RateLimitError, RateLimitKey, RateLimitState};
