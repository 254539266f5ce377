//! Funder REST API Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use grantflow_core::{ChangeKind, EntityId, EntityKind, Funder, FunderPatch};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateFunderRequest {
    pub name: String,
    pub website: Option<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

/// GET /api/v1/funders - List funders
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/funders",
    tag = "Funders",
    responses((status = 200, description = "Funders", body = Vec<Funder>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_funders(
    State(state): State<AppState>,
    auth: AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.funder_list(auth.access()).await?))
}

/// POST /api/v1/funders - Create a funder
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/funders",
    tag = "Funders",
    request_body = CreateFunderRequest,
    responses(
        (status = 201, description = "Funder created", body = Funder),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_funder(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<CreateFunderRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::missing_field("name"));
    }

    let mut funder = Funder::new(auth.org_id, req.name);
    funder.website = req.website;
    funder.focus_areas = req.focus_areas;

    state.store.funder_insert(auth.access(), &funder).await?;
    state.publish(EntityKind::Funder, ChangeKind::Insert, funder.id, funder.org_id);
    Ok((StatusCode::CREATED, Json(funder)))
}

/// GET /api/v1/funders/{id} - Get a funder with its analysis
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/funders/{id}",
    tag = "Funders",
    params(("id" = uuid::Uuid, Path, description = "Funder ID")),
    responses(
        (status = 200, description = "Funder", body = Funder),
        (status = 404, description = "Funder not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_funder(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let funder = state
        .store
        .funder_get(auth.access(), id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Funder", id))?;
    Ok(Json(funder))
}

/// PATCH /api/v1/funders/{id} - Update a funder
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/funders/{id}",
    tag = "Funders",
    params(("id" = uuid::Uuid, Path, description = "Funder ID")),
    request_body = FunderPatch,
    responses(
        (status = 200, description = "Funder updated", body = Funder),
        (status = 404, description = "Funder not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_funder(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(patch): Json<FunderPatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::invalid_input("name cannot be empty"));
    }

    let funder = state.store.funder_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::Funder, ChangeKind::Update, funder.id, funder.org_id);
    Ok(Json(funder))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_funders).post(create_funder))
        .route("/:id", get(get_funder).patch(update_funder))
        .with_state(state)
}
