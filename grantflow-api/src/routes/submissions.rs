//! Submission Checklist and Submission Routes
//!
//! A grant has at most one checklist; writing it replaces the items and
//! recomputes `completion_percentage`. Manual submissions that are recorded
//! as `submitted` move the grant to the `submission` stage.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use grantflow_core::{
    ChangeKind, ChecklistItem, EntityId, EntityKind, Submission, SubmissionChecklist,
    SubmissionMethod, SubmissionStatus,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    state::AppState,
};

// ============================================================================
// CHECKLISTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PutChecklistRequest {
    pub items: Vec<ChecklistItem>,
}

/// GET /api/v1/checklists/{grant_id} - Checklist of a grant
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/checklists/{grant_id}",
    tag = "Submissions",
    params(("grant_id" = uuid::Uuid, Path, description = "Grant ID")),
    responses(
        (status = 200, description = "Checklist", body = SubmissionChecklist),
        (status = 404, description = "No checklist for this grant", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_checklist(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(grant_id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let checklist = state
        .store
        .checklist_get(auth.access(), grant_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No checklist for grant {}", grant_id)))?;
    Ok(Json(checklist))
}

/// PUT /api/v1/checklists/{grant_id} - Replace checklist items
#[cfg_attr(feature = "openapi", utoipa::path(
    put,
    path = "/api/v1/checklists/{grant_id}",
    tag = "Submissions",
    params(("grant_id" = uuid::Uuid, Path, description = "Grant ID")),
    request_body = PutChecklistRequest,
    responses(
        (status = 200, description = "Checklist updated", body = SubmissionChecklist),
        (status = 201, description = "Checklist created", body = SubmissionChecklist),
        (status = 404, description = "Grant not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn put_checklist(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(grant_id): Path<EntityId>,
    Json(req): Json<PutChecklistRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.items.iter().any(|item| item.label.trim().is_empty()) {
        return Err(ApiError::invalid_input("checklist items need a label"));
    }

    let (checklist, created) = state
        .store
        .checklist_upsert(auth.access(), auth.org_id, grant_id, &req.items)
        .await?;

    let (change, status) = if created {
        (ChangeKind::Insert, StatusCode::CREATED)
    } else {
        (ChangeKind::Update, StatusCode::OK)
    };
    state.publish(EntityKind::SubmissionChecklist, change, checklist.id, checklist.org_id);
    Ok((status, Json(checklist)))
}

pub fn create_checklist_router(state: AppState) -> Router {
    Router::new()
        .route("/:grant_id", get(get_checklist).put(put_checklist))
        .with_state(state)
}

// ============================================================================
// SUBMISSIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateSubmissionRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub grant_id: EntityId,
    /// Defaults to `submitted`.
    pub status: Option<SubmissionStatus>,
    pub confirmation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ListSubmissionsQuery {
    #[cfg_attr(feature = "openapi", param(value_type = Option<String>))]
    pub grant_id: Option<EntityId>,
}

/// GET /api/v1/submissions - Submission log, optionally for one grant
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/submissions",
    tag = "Submissions",
    params(ListSubmissionsQuery),
    responses((status = 200, description = "Submissions", body = Vec<Submission>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_submissions(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Query(query): Query<ListSubmissionsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.submission_list(auth.access(), query.grant_id).await?))
}

/// POST /api/v1/submissions - Record a manual submission
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/submissions",
    tag = "Submissions",
    request_body = CreateSubmissionRequest,
    responses(
        (status = 201, description = "Submission recorded", body = Submission),
        (status = 404, description = "Grant not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_submission(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<CreateSubmissionRequest>,
) -> ApiResult<impl IntoResponse> {
    let status = req.status.unwrap_or(SubmissionStatus::Submitted);
    let mut submission = Submission::new(auth.org_id, req.grant_id, SubmissionMethod::Manual, status);
    submission.confirmation = req.confirmation;

    if status == SubmissionStatus::Submitted {
        let grant = state.store.submission_complete(auth.access(), &submission).await?;
        state.publish(EntityKind::Grant, ChangeKind::Update, grant.id, grant.org_id);
    } else {
        state.store.submission_insert(auth.access(), &submission).await?;
    }

    state.publish(EntityKind::Submission, ChangeKind::Insert, submission.id, submission.org_id);
    Ok((StatusCode::CREATED, Json(submission)))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_submissions).post(create_submission))
        .with_state(state)
}
