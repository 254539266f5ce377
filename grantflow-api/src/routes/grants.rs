//! Grant REST API Routes
//!
//! Grants move through the pipeline stages by direct assignment; any stage
//! may be set to any other.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use grantflow_core::{ChangeKind, Date, EntityId, EntityKind, Grant, GrantPatch, GrantStage};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    state::AppState,
};

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateGrantRequest {
    pub title: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub funder_id: Option<EntityId>,
    pub funder_name: Option<String>,
    pub description: Option<String>,
    pub amount_requested: Option<Decimal>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub deadline: Option<Date>,
    /// Defaults to `discovery`.
    pub stage: Option<GrantStage>,
    pub source_url: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ListGrantsQuery {
    pub stage: Option<GrantStage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateStageRequest {
    pub stage: GrantStage,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/grants - List grants, optionally by stage
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/grants",
    tag = "Grants",
    params(ListGrantsQuery),
    responses(
        (status = 200, description = "Grants", body = Vec<Grant>),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_grants(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Query(query): Query<ListGrantsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.grant_list(auth.access(), query.stage).await?))
}

/// POST /api/v1/grants - Create a grant
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/grants",
    tag = "Grants",
    request_body = CreateGrantRequest,
    responses(
        (status = 201, description = "Grant created", body = Grant),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_grant(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<CreateGrantRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.title.trim().is_empty() {
        return Err(ApiError::missing_field("title"));
    }

    let mut grant = Grant::new(auth.org_id, req.title);
    grant.funder_id = req.funder_id;
    grant.funder_name = req.funder_name;
    grant.description = req.description;
    grant.amount_requested = req.amount_requested;
    grant.deadline = req.deadline;
    grant.source_url = req.source_url;
    if let Some(stage) = req.stage {
        grant.stage = stage;
    }
    if let Some(metadata) = req.metadata {
        grant.metadata = metadata;
    }

    state.store.grant_insert(auth.access(), &grant).await?;
    state.publish(EntityKind::Grant, ChangeKind::Insert, grant.id, grant.org_id);
    Ok((StatusCode::CREATED, Json(grant)))
}

/// GET /api/v1/grants/{id} - Get a grant
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/grants/{id}",
    tag = "Grants",
    params(("id" = uuid::Uuid, Path, description = "Grant ID")),
    responses(
        (status = 200, description = "Grant", body = Grant),
        (status = 404, description = "Grant not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_grant(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let grant = state
        .store
        .grant_get(auth.access(), id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Grant", id))?;
    Ok(Json(grant))
}

/// PATCH /api/v1/grants/{id} - Update a grant
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/grants/{id}",
    tag = "Grants",
    params(("id" = uuid::Uuid, Path, description = "Grant ID")),
    request_body = GrantPatch,
    responses(
        (status = 200, description = "Grant updated", body = Grant),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Grant not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_grant(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(patch): Json<GrantPatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::invalid_input("title cannot be empty"));
    }
    if let Some(score) = patch.eligibility_score {
        if !(0..=100).contains(&score) {
            return Err(ApiError::invalid_input("eligibility_score must be between 0 and 100"));
        }
    }

    let grant = state.store.grant_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::Grant, ChangeKind::Update, grant.id, grant.org_id);
    Ok(Json(grant))
}

/// PUT /api/v1/grants/{id}/stage - Move a grant to another pipeline stage
#[cfg_attr(feature = "openapi", utoipa::path(
    put,
    path = "/api/v1/grants/{id}/stage",
    tag = "Grants",
    params(("id" = uuid::Uuid, Path, description = "Grant ID")),
    request_body = UpdateStageRequest,
    responses(
        (status = 200, description = "Stage updated", body = Grant),
        (status = 404, description = "Grant not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_stage(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(req): Json<UpdateStageRequest>,
) -> ApiResult<impl IntoResponse> {
    let patch = GrantPatch {
        stage: Some(req.stage),
        ..Default::default()
    };
    let grant = state.store.grant_update(auth.access(), id, &patch).await?;
    tracing::info!(grant_id = %id, stage = req.stage.as_db_str(), "Grant stage changed");
    state.publish(EntityKind::Grant, ChangeKind::Update, grant.id, grant.org_id);
    Ok(Json(grant))
}

/// DELETE /api/v1/grants/{id} - Delete a grant and its dependents (owner/admin)
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/grants/{id}",
    tag = "Grants",
    params(("id" = uuid::Uuid, Path, description = "Grant ID")),
    responses(
        (status = 204, description = "Grant deleted"),
        (status = 403, description = "Role may not delete grants", body = ApiError),
        (status = 404, description = "Grant not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_grant(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<StatusCode> {
    auth.require_manager("delete grants")?;
    state.store.grant_delete(auth.access(), id).await?;
    state.publish(EntityKind::Grant, ChangeKind::Delete, id, auth.org_id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_grants).post(create_grant))
        .route("/:id", get(get_grant).patch(update_grant).delete(delete_grant))
        .route("/:id/stage", put(update_stage))
        .with_state(state)
}
