//! Award and Report REST API Routes
//!
//! Deleting an award removes its reports in the same transaction and is
//! restricted to owners and admins.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use grantflow_core::{
    Award, ChangeKind, Date, EntityId, EntityKind, Report, ReportPatch, ReportStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

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
pub struct CreateAwardRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub grant_id: EntityId,
    pub amount: Decimal,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub start_date: Option<Date>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub end_date: Option<Date>,
    pub terms: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ListAwardsQuery {
    #[cfg_attr(feature = "openapi", param(value_type = Option<String>))]
    pub grant_id: Option<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateReportRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub award_id: EntityId,
    pub title: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date"))]
    pub due_date: Date,
    pub status: Option<ReportStatus>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ListReportsQuery {
    #[cfg_attr(feature = "openapi", param(value_type = Option<String>))]
    pub award_id: Option<EntityId>,
}

fn validate_award_dates(start: Option<Date>, end: Option<Date>) -> ApiResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => {
            Err(ApiError::invalid_input("end_date must not precede start_date"))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// AWARD HANDLERS
// ============================================================================

/// GET /api/v1/awards - List awards, optionally for one grant
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/awards",
    tag = "Awards",
    params(ListAwardsQuery),
    responses((status = 200, description = "Awards", body = Vec<Award>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_awards(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Query(query): Query<ListAwardsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.award_list(auth.access(), query.grant_id).await?))
}

/// POST /api/v1/awards - Record an award
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/awards",
    tag = "Awards",
    request_body = CreateAwardRequest,
    responses(
        (status = 201, description = "Award created", body = Award),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Grant not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_award(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<CreateAwardRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.amount.is_sign_negative() {
        return Err(ApiError::invalid_input("amount cannot be negative"));
    }
    validate_award_dates(req.start_date, req.end_date)?;

    let mut award = Award::new(auth.org_id, req.grant_id, req.amount);
    award.start_date = req.start_date;
    award.end_date = req.end_date;
    award.terms = req.terms;

    state.store.award_insert(auth.access(), &award).await?;
    state.publish(EntityKind::Award, ChangeKind::Insert, award.id, award.org_id);
    Ok((StatusCode::CREATED, Json(award)))
}

/// GET /api/v1/awards/{id} - Get an award
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/awards/{id}",
    tag = "Awards",
    params(("id" = uuid::Uuid, Path, description = "Award ID")),
    responses(
        (status = 200, description = "Award", body = Award),
        (status = 404, description = "Award not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_award(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let award = state
        .store
        .award_get(auth.access(), id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Award", id))?;
    Ok(Json(award))
}

/// DELETE /api/v1/awards/{id} - Delete an award and its reports (owner/admin)
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/awards/{id}",
    tag = "Awards",
    params(("id" = uuid::Uuid, Path, description = "Award ID")),
    responses(
        (status = 204, description = "Award deleted"),
        (status = 403, description = "Role may not delete awards", body = ApiError),
        (status = 404, description = "Award not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_award(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<StatusCode> {
    auth.require_manager("delete awards")?;
    state.store.award_delete(auth.access(), id).await?;
    state.publish(EntityKind::Award, ChangeKind::Delete, id, auth.org_id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// REPORT HANDLERS
// ============================================================================

/// GET /api/v1/reports - List reports by due date, optionally for one award
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/reports",
    tag = "Awards",
    params(ListReportsQuery),
    responses((status = 200, description = "Reports", body = Vec<Report>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_reports(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Query(query): Query<ListReportsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.report_list(auth.access(), query.award_id).await?))
}

/// POST /api/v1/reports - Schedule a report for an award
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/reports",
    tag = "Awards",
    request_body = CreateReportRequest,
    responses(
        (status = 201, description = "Report created", body = Report),
        (status = 404, description = "Award not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_report(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<CreateReportRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.title.trim().is_empty() {
        return Err(ApiError::missing_field("title"));
    }

    let mut report = Report::new(auth.org_id, req.award_id, req.title, req.due_date);
    if let Some(status) = req.status {
        report.status = status;
    }
    report.content = req.content;

    state.store.report_insert(auth.access(), &report).await?;
    state.publish(EntityKind::Report, ChangeKind::Insert, report.id, report.org_id);
    Ok((StatusCode::CREATED, Json(report)))
}

/// PATCH /api/v1/reports/{id} - Update a report
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/reports/{id}",
    tag = "Awards",
    params(("id" = uuid::Uuid, Path, description = "Report ID")),
    request_body = ReportPatch,
    responses(
        (status = 200, description = "Report updated", body = Report),
        (status = 404, description = "Report not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_report(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(patch): Json<ReportPatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    let report = state.store.report_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::Report, ChangeKind::Update, report.id, report.org_id);
    Ok(Json(report))
}

/// DELETE /api/v1/reports/{id} - Delete a report
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/reports/{id}",
    tag = "Awards",
    params(("id" = uuid::Uuid, Path, description = "Report ID")),
    responses(
        (status = 204, description = "Report deleted"),
        (status = 404, description = "Report not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_report(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<StatusCode> {
    state.store.report_delete(auth.access(), id).await?;
    state.publish(EntityKind::Report, ChangeKind::Delete, id, auth.org_id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// ROUTERS
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_awards).post(create_award))
        .route("/:id", get(get_award).delete(delete_award))
        .with_state(state)
}

/// Routes for `/api/v1/reports`.
pub fn create_report_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_reports).post(create_report))
        .route("/:id", patch(update_report).delete(delete_report))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Option<Date> {
        Date::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_award_period_must_not_run_backwards() {
        assert!(validate_award_dates(date(2026, 1, 1), date(2026, 12, 31)).is_ok());
        assert!(validate_award_dates(date(2026, 12, 31), date(2026, 1, 1)).is_err());
        assert!(validate_award_dates(None, date(2026, 1, 1)).is_ok());
    }
}
