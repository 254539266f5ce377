//! Proposal and Section REST API Routes
//!
//! A proposal is read together with its sections in ascending `sort_order`.
//! Sections can be added, edited and reordered individually.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
    Json, Router,
};
use grantflow_core::{
    ChangeKind, EntityId, EntityKind, Proposal, ProposalPatch, ProposalSection, ProposalStatus,
    SectionPatch,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    state::AppState,
};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SectionInput {
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Defaults to the position in the request, or after the last section.
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateProposalRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub grant_id: EntityId,
    pub title: String,
    pub status: Option<ProposalStatus>,
    #[serde(default)]
    pub sections: Vec<SectionInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ListProposalsQuery {
    #[cfg_attr(feature = "openapi", param(value_type = Option<String>))]
    pub grant_id: Option<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReorderSectionsRequest {
    /// Section ids in their new order. Position becomes `sort_order`.
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub section_ids: Vec<EntityId>,
}

/// A proposal with its ordered sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProposalDetail {
    #[serde(flatten)]
    pub proposal: Proposal,
    pub sections: Vec<ProposalSection>,
}

fn validate_section(input: &SectionInput) -> ApiResult<()> {
    if input.title.trim().is_empty() {
        return Err(ApiError::missing_field("title"));
    }
    Ok(())
}

// ============================================================================
// PROPOSAL HANDLERS
// ============================================================================

/// GET /api/v1/proposals - List proposals, optionally for one grant
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/proposals",
    tag = "Proposals",
    params(ListProposalsQuery),
    responses((status = 200, description = "Proposals", body = Vec<Proposal>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_proposals(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Query(query): Query<ListProposalsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.proposal_list(auth.access(), query.grant_id).await?))
}

/// POST /api/v1/proposals - Create a proposal with its sections
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/proposals",
    tag = "Proposals",
    request_body = CreateProposalRequest,
    responses(
        (status = 201, description = "Proposal created", body = ProposalDetail),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Grant not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_proposal(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<CreateProposalRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.title.trim().is_empty() {
        return Err(ApiError::missing_field("title"));
    }
    req.sections.iter().try_for_each(validate_section)?;

    let mut proposal = Proposal::new(auth.org_id, req.grant_id, req.title);
    if let Some(status) = req.status {
        proposal.status = status;
    }
    let sections: Vec<ProposalSection> = req
        .sections
        .into_iter()
        .enumerate()
        .map(|(position, input)| {
            ProposalSection::new(
                proposal.id,
                input.title,
                input.content,
                input.sort_order.unwrap_or(position as i32),
            )
        })
        .collect();

    state
        .store
        .proposal_create(auth.access(), &proposal, &sections)
        .await?;

    state.publish(EntityKind::Proposal, ChangeKind::Insert, proposal.id, proposal.org_id);
    for section in &sections {
        state.publish(EntityKind::ProposalSection, ChangeKind::Insert, section.id, proposal.org_id);
    }

    let mut sections = sections;
    sections.sort_by_key(|s| s.sort_order);
    Ok((StatusCode::CREATED, Json(ProposalDetail { proposal, sections })))
}

/// GET /api/v1/proposals/{id} - Get a proposal with its sections
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/proposals/{id}",
    tag = "Proposals",
    params(("id" = uuid::Uuid, Path, description = "Proposal ID")),
    responses(
        (status = 200, description = "Proposal", body = ProposalDetail),
        (status = 404, description = "Proposal not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_proposal(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let proposal = state
        .store
        .proposal_get(auth.access(), id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Proposal", id))?;
    let sections = state.store.section_list(auth.access(), id).await?;
    Ok(Json(ProposalDetail { proposal, sections }))
}

/// PATCH /api/v1/proposals/{id} - Update title, status or review fields
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/proposals/{id}",
    tag = "Proposals",
    params(("id" = uuid::Uuid, Path, description = "Proposal ID")),
    request_body = ProposalPatch,
    responses(
        (status = 200, description = "Proposal updated", body = Proposal),
        (status = 404, description = "Proposal not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_proposal(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(patch): Json<ProposalPatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    let proposal = state.store.proposal_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::Proposal, ChangeKind::Update, proposal.id, proposal.org_id);
    Ok(Json(proposal))
}

/// DELETE /api/v1/proposals/{id} - Delete a proposal and its sections
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/proposals/{id}",
    tag = "Proposals",
    params(("id" = uuid::Uuid, Path, description = "Proposal ID")),
    responses(
        (status = 204, description = "Proposal deleted"),
        (status = 404, description = "Proposal not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_proposal(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<StatusCode> {
    state.store.proposal_delete(auth.access(), id).await?;
    state.publish(EntityKind::Proposal, ChangeKind::Delete, id, auth.org_id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// SECTION HANDLERS
// ============================================================================

/// POST /api/v1/proposals/{id}/sections - Add a section
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/proposals/{id}/sections",
    tag = "Proposals",
    params(("id" = uuid::Uuid, Path, description = "Proposal ID")),
    request_body = SectionInput,
    responses(
        (status = 201, description = "Section created", body = ProposalSection),
        (status = 404, description = "Proposal not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_section(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(proposal_id): Path<EntityId>,
    Json(input): Json<SectionInput>,
) -> ApiResult<impl IntoResponse> {
    validate_section(&input)?;

    let sort_order = match input.sort_order {
        Some(order) => order,
        None => state
            .store
            .section_list(auth.access(), proposal_id)
            .await?
            .iter()
            .map(|s| s.sort_order + 1)
            .max()
            .unwrap_or(0),
    };
    let section = ProposalSection::new(proposal_id, input.title, input.content, sort_order);

    state.store.section_insert(auth.access(), &section).await?;
    state.publish(EntityKind::ProposalSection, ChangeKind::Insert, section.id, auth.org_id);
    Ok((StatusCode::CREATED, Json(section)))
}

/// PUT /api/v1/proposals/{id}/sections/order - Reorder sections
#[cfg_attr(feature = "openapi", utoipa::path(
    put,
    path = "/api/v1/proposals/{id}/sections/order",
    tag = "Proposals",
    params(("id" = uuid::Uuid, Path, description = "Proposal ID")),
    request_body = ReorderSectionsRequest,
    responses(
        (status = 200, description = "Sections in their new order", body = Vec<ProposalSection>),
        (status = 400, description = "A section does not belong to the proposal", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn reorder_sections(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(proposal_id): Path<EntityId>,
    Json(req): Json<ReorderSectionsRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.section_ids.is_empty() {
        return Err(ApiError::missing_field("section_ids"));
    }

    let sections = state
        .store
        .section_reorder(auth.access(), proposal_id, &req.section_ids)
        .await?;
    for section in &sections {
        state.publish(EntityKind::ProposalSection, ChangeKind::Update, section.id, auth.org_id);
    }
    Ok(Json(sections))
}

/// PATCH /api/v1/sections/{id} - Edit a section
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/sections/{id}",
    tag = "Proposals",
    params(("id" = uuid::Uuid, Path, description = "Section ID")),
    request_body = SectionPatch,
    responses(
        (status = 200, description = "Section updated", body = ProposalSection),
        (status = 404, description = "Section not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_section(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(patch): Json<SectionPatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    let section = state.store.section_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::ProposalSection, ChangeKind::Update, section.id, auth.org_id);
    Ok(Json(section))
}

/// DELETE /api/v1/sections/{id} - Remove a section
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/sections/{id}",
    tag = "Proposals",
    params(("id" = uuid::Uuid, Path, description = "Section ID")),
    responses(
        (status = 204, description = "Section deleted"),
        (status = 404, description = "Section not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_section(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<StatusCode> {
    let section = state.store.section_delete(auth.access(), id).await?;
    state.publish(EntityKind::ProposalSection, ChangeKind::Delete, section.id, auth.org_id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// ROUTERS
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_proposals).post(create_proposal))
        .route("/:id", get(get_proposal).patch(update_proposal).delete(delete_proposal))
        .route("/:id/sections", post(create_section))
        .route("/:id/sections/order", put(reorder_sections))
        .with_state(state)
}

/// Routes for `/api/v1/sections`.
pub fn create_section_router(state: AppState) -> Router {
    Router::new()
        .route("/:id", patch(update_section).delete(delete_section))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_detail_flattens_proposal_fields() -> Result<(), String> {
        let proposal = Proposal::new(uuid::Uuid::nil(), uuid::Uuid::nil(), "Capacity building");
        let section = ProposalSection::new(proposal.id, "Need", "Our community", 0);
        let detail = ProposalDetail {
            proposal: proposal.clone(),
            sections: vec![section],
        };

        let json = serde_json::to_value(&detail).map_err(|e| e.to_string())?;
        assert_eq!(json["id"], serde_json::json!(proposal.id));
        assert_eq!(json["title"], "Capacity building");
        assert_eq!(json["sections"][0]["title"], "Need");
        Ok(())
    }

    #[test]
    fn test_blank_section_title_rejected() {
        let input = SectionInput {
            title: "  ".to_string(),
            content: String::new(),
            sort_order: None,
        };
        assert!(validate_section(&input).is_err());
    }
}
