//! Workflow Ledger and Trigger Routes
//!
//! `POST /api/v1/workflows/{kind}` hands a task to the automation engine and
//! answers with the ledger id immediately. Results arrive later through the
//! callback receiver and show up in the ledger rows listed here.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use grantflow_core::{EntityId, WorkflowExecution, WorkflowKind, WorkflowStatus};
use grantflow_storage::WorkflowFilter;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    state::AppState,
};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TriggerRequest {
    /// The entity the workflow works on. Not used by `discover-grants`.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub entity_id: Option<EntityId>,
    /// Task-specific parameters passed through to the engine.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub parameters: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(rename = "workflowId")]
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub workflow_id: EntityId,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ListWorkflowsQuery {
    pub workflow_name: Option<String>,
    pub status: Option<WorkflowStatus>,
    #[cfg_attr(feature = "openapi", param(value_type = Option<String>))]
    pub entity_id: Option<EntityId>,
}

impl From<ListWorkflowsQuery> for WorkflowFilter {
    fn from(query: ListWorkflowsQuery) -> Self {
        WorkflowFilter {
            workflow_name: query.workflow_name,
            status: query.status,
            entity_id: query.entity_id,
        }
    }
}

fn parse_kind(segment: &str) -> ApiResult<WorkflowKind> {
    WorkflowKind::from_db_str(segment)
        .map_err(|_| ApiError::not_found(format!("Unknown workflow: {}", segment)))
}

fn normalize_parameters(parameters: Option<JsonValue>) -> ApiResult<JsonValue> {
    match parameters {
        None | Some(JsonValue::Null) => Ok(JsonValue::Object(Default::default())),
        Some(value @ JsonValue::Object(_)) => Ok(value),
        Some(_) => Err(ApiError::invalid_format("parameters", "JSON object")),
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/workflows - List ledger rows
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/workflows",
    tag = "Workflows",
    params(ListWorkflowsQuery),
    responses((status = 200, description = "Workflow executions", body = Vec<WorkflowExecution>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_workflows(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Query(query): Query<ListWorkflowsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = WorkflowFilter::from(query);
    Ok(Json(state.store.workflow_list(auth.access(), &filter).await?))
}

/// GET /api/v1/workflows/{id} - Get one ledger row
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/workflows/{id}",
    tag = "Workflows",
    params(("id" = uuid::Uuid, Path, description = "Workflow execution ID")),
    responses(
        (status = 200, description = "Workflow execution", body = WorkflowExecution),
        (status = 404, description = "Workflow execution not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_workflow(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = uuid::Uuid::parse_str(&id).map_err(|_| ApiError::invalid_format("id", "valid UUID"))?;
    let execution = state
        .store
        .workflow_get(auth.access(), id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Workflow execution", id))?;
    Ok(Json(execution))
}

/// POST /api/v1/workflows/{kind} - Trigger a workflow
///
/// `kind` is one of `discover-grants`, `screen-eligibility`,
/// `generate-proposal`, `review-proposal`, `analyze-funder`,
/// `customize-narrative`, `generate-budget`, `generate-report`,
/// `generate-checklist`, `auto-submit`, `categorize-document`.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/workflows/{kind}",
    tag = "Workflows",
    params(("kind" = String, Path, description = "Workflow name")),
    request_body = TriggerRequest,
    responses(
        (status = 200, description = "Workflow dispatched", body = TriggerResponse),
        (status = 400, description = "Missing entity_id or bad parameters", body = ApiError),
        (status = 404, description = "Unknown workflow or target entity", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn trigger_workflow(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(kind): Path<String>,
    body: Option<Json<TriggerRequest>>,
) -> ApiResult<impl IntoResponse> {
    let kind = parse_kind(&kind)?;
    let Json(request) = body.unwrap_or_default();
    let parameters = normalize_parameters(request.parameters)?;

    let execution = state
        .dispatcher
        .dispatch(auth.org_id, kind, request.entity_id, parameters)
        .await?;

    Ok(Json(TriggerResponse {
        success: true,
        workflow_id: execution.id,
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_workflows))
        // One segment serves both the ledger id (GET) and the workflow kind (POST).
        .route("/:id", get(get_workflow).post(trigger_workflow))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_response_uses_camel_case_id() -> Result<(), String> {
        let id = uuid::Uuid::now_v7();
        let json = serde_json::to_value(TriggerResponse {
            success: true,
            workflow_id: id,
        })
        .map_err(|e| e.to_string())?;
        assert_eq!(json, json!({"success": true, "workflowId": id}));
        Ok(())
    }

    #[test]
    fn test_every_kind_parses_from_its_path_segment() -> Result<(), String> {
        for kind in WorkflowKind::ALL {
            let parsed = parse_kind(kind.workflow_name()).map_err(|e| e.to_string())?;
            assert_eq!(parsed, *kind);
        }
        assert!(parse_kind("make-coffee").is_err());
        Ok(())
    }

    #[test]
    fn test_parameters_default_to_empty_object() -> Result<(), String> {
        assert_eq!(normalize_parameters(None).map_err(|e| e.to_string())?, json!({}));
        assert_eq!(
            normalize_parameters(Some(JsonValue::Null)).map_err(|e| e.to_string())?,
            json!({})
        );
        assert_eq!(
            normalize_parameters(Some(json!({"keywords": ["arts"]}))).map_err(|e| e.to_string())?,
            json!({"keywords": ["arts"]})
        );
        assert!(normalize_parameters(Some(json!([1, 2]))).is_err());
        Ok(())
    }
}
