//! Rate Limiting Middleware
//!
//! Authenticated requests are limited per organization, everything else per
//! client IP. Exceeding the quota returns 429 with `Retry-After`.

use crate::auth::AuthContext;
use crate::config::ApiConfig;
use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use grantflow_core::EntityId;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Key for rate limiting.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    Ip(IpAddr),
    Organization(EntityId),
}

/// State for the rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<ApiConfig>,
    limiters: Arc<DashMap<RateLimitKey, Arc<DirectRateLimiter>>>,
}

impl RateLimitState {
    pub fn new(config: Arc<ApiConfig>) -> Self {
        Self {
            config,
            limiters: Arc::new(DashMap::new()),
        }
    }

    fn limit_for(&self, key: &RateLimitKey) -> u32 {
        match key {
            RateLimitKey::Ip(_) => self.config.rate_limit_unauthenticated,
            RateLimitKey::Organization(_) => self.config.rate_limit_authenticated,
        }
    }

    fn limiter(&self, key: RateLimitKey) -> Arc<DirectRateLimiter> {
        let limit = self.limit_for(&key);
        let burst = self.config.rate_limit_burst;
        self.limiters
            .entry(key)
            .or_insert_with(|| {
                let quota = Quota::per_minute(NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN))
                    .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
                Arc::new(RateLimiter::direct(quota))
            })
            .clone()
    }
}

/// Rejection carrying the seconds until the quota refills.
#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let mut response = ApiError::too_many_requests(self.retry_after).into_response();
        response.headers_mut().insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from_str(&self.retry_after.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60")),
        );
        response
    }
}

/// Client IP from proxy headers, then the socket address.
fn extract_client_ip(request: &Request) -> IpAddr {
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok());
    if let Some(ip) = real_ip {
        return ip;
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.config.rate_limit_enabled {
        return Ok(next.run(request).await);
    }

    let key = match request.extensions().get::<AuthContext>() {
        Some(auth) => RateLimitKey::Organization(auth.org_id),
        None => RateLimitKey::Ip(extract_client_ip(&request)),
    };

    match state.limiter(key).check() {
        Ok(_) => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from(state.limit_for(&key)),
            );
            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1);
            tracing::debug!(key = ?key, retry_after, "Rate limit exceeded");
            Err(RateLimitError { retry_after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(config: ApiConfig) -> Router {
        let state = RateLimitState::new(Arc::new(config));
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
    }

    fn request_from(ip: &str) -> Result<axum::http::Request<Body>, String> {
        axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn test_burst_exhaustion_returns_429() -> Result<(), String> {
        let app = app(ApiConfig {
            rate_limit_unauthenticated: 1,
            rate_limit_burst: 2,
            ..Default::default()
        });

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request_from("10.0.0.1")?)
                .await
                .map_err(|e| format!("{:?}", e))?;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request_from("10.0.0.1")?)
            .await
            .map_err(|e| format!("{:?}", e))?;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));

        // A different client has its own bucket.
        let response = app
            .oneshot(request_from("10.0.0.2")?)
            .await
            .map_err(|e| format!("{:?}", e))?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_never_limits() -> Result<(), String> {
        let app = app(ApiConfig {
            rate_limit_enabled: false,
            rate_limit_unauthenticated: 1,
            rate_limit_burst: 1,
            ..Default::default()
        });
        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request_from("10.0.0.3")?)
                .await
                .map_err(|e| format!("{:?}", e))?;
            assert_eq!(response.status(), StatusCode::OK);
        }
        Ok(())
    }
}
