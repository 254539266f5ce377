//! Narrative REST API Routes
//!
//! Narratives are reusable text blocks owned by the organization and not tied
//! to any grant.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use grantflow_core::{ChangeKind, EntityId, EntityKind, Narrative, NarrativePatch};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateNarrativeRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// GET /api/v1/narratives - List narratives
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/narratives",
    tag = "Narratives",
    responses((status = 200, description = "Narratives", body = Vec<Narrative>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_narratives(
    State(state): State<AppState>,
    auth: AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.narrative_list(auth.access()).await?))
}

/// POST /api/v1/narratives - Create a narrative
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/narratives",
    tag = "Narratives",
    request_body = CreateNarrativeRequest,
    responses(
        (status = 201, description = "Narrative created", body = Narrative),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_narrative(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<CreateNarrativeRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.title.trim().is_empty() {
        return Err(ApiError::missing_field("title"));
    }
    if req.content.trim().is_empty() {
        return Err(ApiError::missing_field("content"));
    }

    let mut narrative = Narrative::new(auth.org_id, req.title, req.content);
    narrative.tags = req.tags;

    state.store.narrative_insert(auth.access(), &narrative).await?;
    state.publish(EntityKind::Narrative, ChangeKind::Insert, narrative.id, narrative.org_id);
    Ok((StatusCode::CREATED, Json(narrative)))
}

/// GET /api/v1/narratives/{id} - Get a narrative
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/narratives/{id}",
    tag = "Narratives",
    params(("id" = uuid::Uuid, Path, description = "Narrative ID")),
    responses(
        (status = 200, description = "Narrative", body = Narrative),
        (status = 404, description = "Narrative not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_narrative(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let narrative = state
        .store
        .narrative_get(auth.access(), id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Narrative", id))?;
    Ok(Json(narrative))
}

/// PATCH /api/v1/narratives/{id} - Update a narrative
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/narratives/{id}",
    tag = "Narratives",
    params(("id" = uuid::Uuid, Path, description = "Narrative ID")),
    request_body = NarrativePatch,
    responses(
        (status = 200, description = "Narrative updated", body = Narrative),
        (status = 404, description = "Narrative not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_narrative(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(patch): Json<NarrativePatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    let narrative = state.store.narrative_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::Narrative, ChangeKind::Update, narrative.id, narrative.org_id);
    Ok(Json(narrative))
}

/// DELETE /api/v1/narratives/{id} - Delete a narrative
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/narratives/{id}",
    tag = "Narratives",
    params(("id" = uuid::Uuid, Path, description = "Narrative ID")),
    responses(
        (status = 204, description = "Narrative deleted"),
        (status = 404, description = "Narrative not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_narrative(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<StatusCode> {
    state.store.narrative_delete(auth.access(), id).await?;
    state.publish(EntityKind::Narrative, ChangeKind::Delete, id, auth.org_id);
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_narratives).post(create_narrative))
        .route("/:id", get(get_narrative).patch(update_narrative).delete(delete_narrative))
        .with_state(state)
}
