//! REST API Route Handlers
//!
//! One module per resource. Each exposes `create_router(state)` returning a
//! router that is nested under `/api/v1` by [`SecureRouterBuilder`].
//!
//! Public surfaces live outside `/api/v1`:
//! - `/api/webhook`: automation engine callbacks (shared secret)
//! - `/files/*path`: signed document downloads
//! - `/health`, `/metrics`, `/openapi.json`

pub mod awards;
pub mod budgets;
pub mod documents;
pub mod files;
pub mod funders;
pub mod grants;
pub mod health;
pub mod narratives;
pub mod organization;
pub mod proposals;
pub mod submissions;
pub mod webhook;
pub mod workflows;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::AuthConfig;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{auth_middleware, rate_limit_middleware, AuthMiddlewareState, RateLimitState};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};
use crate::ws::ws_handler;

pub use awards::create_router as awards_router;
pub use budgets::create_router as budgets_router;
pub use documents::create_router as documents_router;
pub use files::create_router as files_router;
pub use funders::create_router as funders_router;
pub use grants::create_router as grants_router;
pub use health::create_router as health_router;
pub use narratives::create_router as narratives_router;
pub use organization::create_router as organization_router;
pub use proposals::create_router as proposals_router;
pub use submissions::create_router as submissions_router;
pub use webhook::create_router as webhook_router;
pub use workflows::create_router as workflows_router;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

#[cfg(feature = "openapi")]
async fn openapi_json() -> impl axum::response::IntoResponse {
    use utoipa::OpenApi;
    axum::Json(crate::openapi::ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION CHECKS
// ============================================================================

fn environment() -> String {
    std::env::var("GRANTFLOW_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

fn is_production_environment(environment: &str) -> bool {
    matches!(environment.to_lowercase().as_str(), "production" | "prod")
}

fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set GRANTFLOW_CORS_ORIGINS.",
        ));
    }
    if !config.rate_limit_enabled {
        tracing::warn!(
            "Rate limiting is disabled in production. Set GRANTFLOW_RATE_LIMIT_ENABLED=true to enable it."
        );
    }
    Ok(())
}

// ============================================================================
// ROUTER BUILDER
// ============================================================================

/// Assembles the full application router with authentication, rate limiting,
/// observability and CORS applied in a fixed order.
pub struct SecureRouterBuilder {
    state: AppState,
    api_config: ApiConfig,
    auth_state: AuthMiddlewareState,
    rate_limit_state: RateLimitState,
}

impl SecureRouterBuilder {
    pub fn new(state: AppState, api_config: ApiConfig, auth_config: AuthConfig) -> ApiResult<Self> {
        let environment = environment();
        auth_config.validate_for_production(&environment)?;
        if is_production_environment(&environment) {
            validate_api_config_for_production(&api_config)?;
        }

        let auth_state = AuthMiddlewareState::new(Arc::new(auth_config), state.store.clone());
        let rate_limit_state = RateLimitState::new(Arc::new(api_config.clone()));

        Ok(Self {
            state,
            api_config,
            auth_state,
            rate_limit_state,
        })
    }

    fn build_entity_routes(&self) -> Router {
        let state = &self.state;
        Router::new()
            .merge(organization::create_router(state.clone()))
            .nest("/grants", grants::create_router(state.clone()))
            .nest("/funders", funders::create_router(state.clone()))
            .nest("/proposals", proposals::create_router(state.clone()))
            .nest("/sections", proposals::create_section_router(state.clone()))
            .nest("/budgets", budgets::create_router(state.clone()))
            .nest("/budget-items", budgets::create_line_item_router(state.clone()))
            .nest("/awards", awards::create_router(state.clone()))
            .nest("/reports", awards::create_report_router(state.clone()))
            .nest("/documents", documents::create_router(state.clone()))
            .nest("/narratives", narratives::create_router(state.clone()))
            .nest("/checklists", submissions::create_checklist_router(state.clone()))
            .nest("/submissions", submissions::create_router(state.clone()))
            .nest("/workflows", workflows::create_router(state.clone()))
            .merge(
                Router::new()
                    .route("/realtime", get(ws_handler))
                    .with_state(state.ws.clone()),
            )
    }

    pub fn build(self) -> Router {
        // Auth runs first so the limiter can key authenticated calls by organization.
        let api_routes = self
            .build_entity_routes()
            .layer(from_fn_with_state(self.rate_limit_state.clone(), rate_limit_middleware))
            .layer(from_fn_with_state(self.auth_state.clone(), auth_middleware));

        let public_routes = Router::new()
            .nest("/api", webhook::create_router(self.state.clone()))
            .nest("/files", files::create_router(self.state.clone()))
            .layer(from_fn_with_state(self.rate_limit_state.clone(), rate_limit_middleware));

        #[allow(unused_mut)]
        let mut router = Router::new()
            .nest("/api/v1", api_routes)
            .merge(public_routes)
            .nest("/health", health::create_router(self.state.clone()))
            .route("/metrics", get(metrics_handler));

        #[cfg(feature = "openapi")]
        {
            router = router.route("/openapi.json", get(openapi_json));
        }

        #[cfg(feature = "swagger-ui")]
        {
            use utoipa::OpenApi;
            use utoipa_swagger_ui::SwaggerUi;
            router = router.merge(
                SwaggerUi::new("/swagger-ui").url("/openapi.json", crate::openapi::ApiDoc::openapi()),
            );
        }

        let cors = build_cors_layer(&self.api_config);

        router.layer(from_fn(observability_middleware)).layer(cors)
    }
}

// ============================================================================
// CORS
// ============================================================================

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-tenant-id"),
            HeaderName::from_static(webhook::WEBHOOK_SECRET_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("retry-after"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: restricting origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Build the application router.
pub fn create_api_router(state: AppState, api_config: &ApiConfig, auth_config: AuthConfig) -> ApiResult<Router> {
    SecureRouterBuilder::new(state, api_config.clone(), auth_config).map(SecureRouterBuilder::build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_environment_names() {
        assert!(is_production_environment("production"));
        assert!(is_production_environment("PROD"));
        assert!(!is_production_environment("development"));
        assert!(!is_production_environment("staging"));
    }

    #[test]
    fn test_production_requires_cors_origins() {
        let open = ApiConfig::default();
        assert!(validate_api_config_for_production(&open).is_err());

        let locked = ApiConfig {
            cors_origins: vec!["https://app.example.org".to_string()],
            ..Default::default()
        };
        assert!(validate_api_config_for_production(&locked).is_ok());
    }
}
