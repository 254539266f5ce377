//! Axum Middleware for Authentication
//!
//! Verifies credentials, resolves the caller's organization through the
//! store and injects an [`AuthContext`] into request extensions.
//! Returns 401 for missing or bad credentials and 403 when the caller has no
//! organization.

use crate::auth::{authenticate, resolve_membership, AuthConfig, AuthContext};
use crate::error::ApiError;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use grantflow_storage::GrantStore;
use std::sync::Arc;

/// Credentials config plus the store used to resolve user organizations.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
    pub store: Arc<dyn GrantStore>,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: Arc<AuthConfig>, store: Arc<dyn GrantStore>) -> Self {
        Self { auth_config, store }
    }
}

impl std::fmt::Debug for AuthMiddlewareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddlewareState")
            .field("auth_config", &self.auth_config)
            .finish_non_exhaustive()
    }
}

/// Reads `X-API-Key`, `Authorization` and `X-Tenant-ID`, verifies the
/// credential, resolves the organization and stores the resulting
/// `AuthContext` on the request.
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    // Owned copies: nothing borrowing `request` may live across an await.
    let (api_key_header, auth_header, tenant_id_header) = {
        let headers = request.headers();
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        };
        (read("x-api-key"), read("authorization"), read("x-tenant-id"))
    };

    let credential = authenticate(
        &state.auth_config,
        api_key_header.as_deref(),
        auth_header.as_deref(),
        tenant_id_header.as_deref(),
    )
    .map_err(AuthMiddlewareError)?;

    let auth_context = resolve_membership(state.store.as_ref(), credential)
        .await
        .map_err(AuthMiddlewareError)?;

    tracing::Span::current().record("org_id", tracing::field::display(auth_context.org_id));
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}

#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

/// The authenticated caller. Only valid behind `auth_middleware`; anywhere
/// else extraction fails with 500.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub AuthContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error("route is missing auth_middleware"))
            })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_jwt_token, AuthMethod};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use grantflow_core::Organization;
    use grantflow_storage::MemoryStore;
    use grantflow_test_utils::fixtures;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Harness {
        app: Router,
        config: Arc<AuthConfig>,
        org: Organization,
        user_id: Uuid,
    }

    async fn harness() -> Result<Harness, String> {
        let store = Arc::new(MemoryStore::new());
        let org = fixtures::organization();
        store.organization_insert(&org).await.map_err(|e| e.to_string())?;
        let profile = fixtures::owner(org.id);
        store.profile_insert(&profile).await.map_err(|e| e.to_string())?;

        let mut config = AuthConfig::default();
        config.add_api_key("gf_test_key_123".to_string());
        let config = Arc::new(config);

        async fn handler(auth: AuthExtractor) -> String {
            format!("org={} method={:?} role={}", auth.org_id, auth.auth_method, auth.role)
        }

        let state = AuthMiddlewareState::new(config.clone(), store);
        let app = Router::new()
            .route("/protected", get(handler))
            .layer(middleware::from_fn_with_state(state, auth_middleware));

        Ok(Harness {
            app,
            config,
            org,
            user_id: profile.id,
        })
    }

    /// GET /protected with the given headers; returns status and body text.
    async fn get_protected(app: &Router, headers: &[(&str, String)]) -> Result<(StatusCode, String), String> {
        let mut builder = Request::builder().uri("/protected");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder.body(Body::empty()).map_err(|e| e.to_string())?;
        let response = app.clone().oneshot(request).await.map_err(|e| format!("{:?}", e))?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn bearer(config: &AuthConfig, user_id: Uuid) -> Result<(&'static str, String), String> {
        let token = generate_jwt_token(config, user_id, None).map_err(|e| e.message)?;
        Ok(("authorization", format!("Bearer {}", token)))
    }

    #[tokio::test]
    async fn test_api_key_acts_as_admin_of_named_tenant() -> Result<(), String> {
        let h = harness().await?;
        let (status, body) = get_protected(
            &h.app,
            &[("x-api-key", "gf_test_key_123".into()), ("x-tenant-id", h.org.id.to_string())],
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("org={} method={:?} role=admin", h.org.id, AuthMethod::ApiKey));
        Ok(())
    }

    #[tokio::test]
    async fn test_jwt_resolves_org_from_profile() -> Result<(), String> {
        let h = harness().await?;
        let (status, body) = get_protected(&h.app, &[bearer(&h.config, h.user_id)?]).await?;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(&format!("org={}", h.org.id)));
        assert!(body.ends_with("role=owner"));
        Ok(())
    }

    #[tokio::test]
    async fn test_jwt_ignores_tenant_header() -> Result<(), String> {
        let h = harness().await?;
        let headers = [bearer(&h.config, h.user_id)?, ("x-tenant-id", Uuid::now_v7().to_string())];
        let (_, body) = get_protected(&h.app, &headers).await?;
        assert!(body.starts_with(&format!("org={}", h.org.id)));
        Ok(())
    }

    #[tokio::test]
    async fn test_jwt_for_user_without_profile_is_forbidden() -> Result<(), String> {
        let h = harness().await?;
        let (status, _) = get_protected(&h.app, &[bearer(&h.config, Uuid::now_v7())?]).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_or_garbled_credentials_are_401() -> Result<(), String> {
        let h = harness().await?;
        let (status, _) = get_protected(&h.app, &[]).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            get_protected(&h.app, &[("authorization", "Bearer not.a.jwt".into())]).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = get_protected(&h.app, &[("x-api-key", "gf_wrong_key".into())]).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_api_key_without_tenant_is_400() -> Result<(), String> {
        let h = harness().await?;
        let (status, _) = get_protected(&h.app, &[("x-api-key", "gf_test_key_123".into())]).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_authenticates_from_spawned_tasks() -> Result<(), String> {
        let h = harness().await?;
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let app = h.app.clone();
            let headers = vec![bearer(&h.config, h.user_id)?];
            tasks.push(tokio::spawn(async move { get_protected(&app, &headers).await }));
        }
        for task in tasks {
            let (status, _) = task.await.map_err(|e| e.to_string())??;
            assert_eq!(status, StatusCode::OK);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_extractor_without_middleware_is_500() -> Result<(), String> {
        async fn handler(AuthExtractor(_auth): AuthExtractor) -> &'static str {
            "unreachable"
        }

        let app = Router::new().route("/protected", get(handler));
        let (status, _) = get_protected(&app, &[]).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }
}
