//! Organization, profile and caller identity routes.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use grantflow_core::{ChangeKind, EntityId, EntityKind, Organization, OrganizationPatch, ProfileRole};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    state::AppState,
};

/// Response of `GET /api/v1/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MeResponse {
    /// Nil for API key callers.
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    pub role: ProfileRole,
    pub auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub organization: Organization,
}

async fn load_organization(state: &AppState, auth: &AuthExtractor) -> ApiResult<Organization> {
    state
        .store
        .organization_get(auth.access(), auth.org_id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Organization", auth.org_id))
}

/// GET /api/v1/organization - The caller's organization
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/organization",
    tag = "Organization",
    responses(
        (status = 200, description = "Organization", body = Organization),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_organization(
    State(state): State<AppState>,
    auth: AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(load_organization(&state, &auth).await?))
}

/// PATCH /api/v1/organization - Update name, EIN or mission (owner/admin)
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/organization",
    tag = "Organization",
    request_body = OrganizationPatch,
    responses(
        (status = 200, description = "Organization updated", body = Organization),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 403, description = "Role may not update the organization", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_organization(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(patch): Json<OrganizationPatch>,
) -> ApiResult<impl IntoResponse> {
    auth.require_manager("update the organization")?;
    crate::require_changes!(patch);
    if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::invalid_input("name cannot be empty"));
    }

    let org = state
        .store
        .organization_update(auth.access(), auth.org_id, &patch)
        .await?;
    state.publish(EntityKind::Organization, ChangeKind::Update, org.id, org.id);
    Ok(Json(org))
}

/// GET /api/v1/profiles - Members of the caller's organization
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/profiles",
    tag = "Organization",
    responses(
        (status = 200, description = "Profiles", body = Vec<grantflow_core::Profile>),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_profiles(
    State(state): State<AppState>,
    auth: AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.profile_list(auth.access()).await?))
}

/// GET /api/v1/me - The authenticated caller
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/me",
    tag = "Organization",
    responses(
        (status = 200, description = "Caller identity", body = MeResponse),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn me(State(state): State<AppState>, auth: AuthExtractor) -> ApiResult<impl IntoResponse> {
    let organization = load_organization(&state, &auth).await?;
    Ok(Json(MeResponse {
        user_id: auth.user_id,
        org_id: auth.org_id,
        role: auth.role,
        auth_method: auth.auth_method.as_str().to_string(),
        email: auth.email.clone(),
        organization,
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/organization", get(get_organization).patch(update_organization))
        .route("/profiles", get(list_profiles))
        .route("/me", get(me))
        .with_state(state)
}
