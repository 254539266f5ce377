//! Budget REST API Routes
//!
//! `total_amount` is owned by the store: every line-item write returns the
//! budget with its recomputed total, and no request body can set it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use grantflow_core::{
    Budget, BudgetLineItem, BudgetPatch, ChangeKind, EntityId, EntityKind, LineItemPatch,
};
use grantflow_storage::TemplateCopy;
use rust_decimal::Decimal;
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
pub struct LineItemInput {
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateBudgetRequest {
    pub name: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub grant_id: Option<EntityId>,
    pub narrative: Option<String>,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default)]
    pub line_items: Vec<LineItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AddLineItemsRequest {
    pub line_items: Vec<LineItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FromTemplateRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub template_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub grant_id: Option<EntityId>,
    /// Defaults to the template's name.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ListBudgetsQuery {
    #[cfg_attr(feature = "openapi", param(value_type = Option<String>))]
    pub grant_id: Option<EntityId>,
}

/// A budget with its line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BudgetDetail {
    #[serde(flatten)]
    pub budget: Budget,
    pub line_items: Vec<BudgetLineItem>,
}

/// A changed line item and the budget total it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LineItemResponse {
    pub line_item: BudgetLineItem,
    pub budget: Budget,
}

fn build_line_items(budget_id: EntityId, inputs: Vec<LineItemInput>) -> ApiResult<Vec<BudgetLineItem>> {
    inputs
        .into_iter()
        .map(|input| {
            if input.category.trim().is_empty() {
                return Err(ApiError::missing_field("category"));
            }
            if input.amount.is_sign_negative() {
                return Err(ApiError::invalid_input("amount cannot be negative"));
            }
            Ok(BudgetLineItem::new(budget_id, input.category, input.description, input.amount))
        })
        .collect()
}

async fn load_detail(state: &AppState, auth: &AuthExtractor, budget: Budget) -> ApiResult<BudgetDetail> {
    let line_items = state.store.line_item_list(auth.access(), budget.id).await?;
    Ok(BudgetDetail { budget, line_items })
}

// ============================================================================
// BUDGET HANDLERS
// ============================================================================

/// GET /api/v1/budgets - List budgets, optionally for one grant
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/budgets",
    tag = "Budgets",
    params(ListBudgetsQuery),
    responses((status = 200, description = "Budgets", body = Vec<Budget>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_budgets(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Query(query): Query<ListBudgetsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.budget_list(auth.access(), query.grant_id).await?))
}

/// POST /api/v1/budgets - Create a budget with its line items
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/budgets",
    tag = "Budgets",
    request_body = CreateBudgetRequest,
    responses(
        (status = 201, description = "Budget created", body = BudgetDetail),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_budget(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<CreateBudgetRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::missing_field("name"));
    }

    let mut budget = Budget::new(auth.org_id, req.name);
    budget.grant_id = req.grant_id;
    budget.narrative = req.narrative;
    budget.is_template = req.is_template;
    let items = build_line_items(budget.id, req.line_items)?;

    let budget = state.store.budget_create(auth.access(), &budget, &items).await?;
    state.publish(EntityKind::Budget, ChangeKind::Insert, budget.id, budget.org_id);
    for item in &items {
        state.publish(EntityKind::BudgetLineItem, ChangeKind::Insert, item.id, budget.org_id);
    }

    Ok((
        StatusCode::CREATED,
        Json(BudgetDetail {
            budget,
            line_items: items,
        }),
    ))
}

/// POST /api/v1/budgets/from-template - Copy a template budget
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/budgets/from-template",
    tag = "Budgets",
    request_body = FromTemplateRequest,
    responses(
        (status = 201, description = "Budget created from template", body = BudgetDetail),
        (status = 400, description = "Budget is not a template", body = ApiError),
        (status = 404, description = "Template not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn create_from_template(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Json(req): Json<FromTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    let copy = TemplateCopy {
        template_id: req.template_id,
        org_id: auth.org_id,
        grant_id: req.grant_id,
        name: req.name,
    };
    let budget = state.store.budget_from_template(auth.access(), &copy).await?;
    state.publish(EntityKind::Budget, ChangeKind::Insert, budget.id, budget.org_id);

    let detail = load_detail(&state, &auth, budget).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// GET /api/v1/budgets/{id} - Get a budget with its line items
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/budgets/{id}",
    tag = "Budgets",
    params(("id" = uuid::Uuid, Path, description = "Budget ID")),
    responses(
        (status = 200, description = "Budget", body = BudgetDetail),
        (status = 404, description = "Budget not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_budget(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let budget = state
        .store
        .budget_get(auth.access(), id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Budget", id))?;
    Ok(Json(load_detail(&state, &auth, budget).await?))
}

/// PATCH /api/v1/budgets/{id} - Update budget header fields
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/budgets/{id}",
    tag = "Budgets",
    params(("id" = uuid::Uuid, Path, description = "Budget ID")),
    request_body = BudgetPatch,
    responses(
        (status = 200, description = "Budget updated", body = Budget),
        (status = 404, description = "Budget not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_budget(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(patch): Json<BudgetPatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    let budget = state.store.budget_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::Budget, ChangeKind::Update, budget.id, budget.org_id);
    Ok(Json(budget))
}

/// DELETE /api/v1/budgets/{id} - Delete a budget and its line items
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/budgets/{id}",
    tag = "Budgets",
    params(("id" = uuid::Uuid, Path, description = "Budget ID")),
    responses(
        (status = 204, description = "Budget deleted"),
        (status = 404, description = "Budget not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_budget(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<StatusCode> {
    state.store.budget_delete(auth.access(), id).await?;
    state.publish(EntityKind::Budget, ChangeKind::Delete, id, auth.org_id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// LINE ITEM HANDLERS
// ============================================================================

/// POST /api/v1/budgets/{id}/items - Add line items
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/budgets/{id}/items",
    tag = "Budgets",
    params(("id" = uuid::Uuid, Path, description = "Budget ID")),
    request_body = AddLineItemsRequest,
    responses(
        (status = 201, description = "Budget with recomputed total", body = BudgetDetail),
        (status = 404, description = "Budget not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn add_line_items(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(budget_id): Path<EntityId>,
    Json(req): Json<AddLineItemsRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.line_items.is_empty() {
        return Err(ApiError::missing_field("line_items"));
    }
    let items = build_line_items(budget_id, req.line_items)?;

    let budget = state
        .store
        .line_items_insert(auth.access(), budget_id, &items)
        .await?;
    for item in &items {
        state.publish(EntityKind::BudgetLineItem, ChangeKind::Insert, item.id, budget.org_id);
    }
    state.publish(EntityKind::Budget, ChangeKind::Update, budget.id, budget.org_id);

    let detail = load_detail(&state, &auth, budget).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// PATCH /api/v1/budget-items/{id} - Edit a line item
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/budget-items/{id}",
    tag = "Budgets",
    params(("id" = uuid::Uuid, Path, description = "Line item ID")),
    request_body = LineItemPatch,
    responses(
        (status = 200, description = "Line item and recomputed budget", body = LineItemResponse),
        (status = 404, description = "Line item not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_line_item(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(patch): Json<LineItemPatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    if patch.amount.is_some_and(|a| a.is_sign_negative()) {
        return Err(ApiError::invalid_input("amount cannot be negative"));
    }

    let (line_item, budget) = state.store.line_item_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::BudgetLineItem, ChangeKind::Update, line_item.id, budget.org_id);
    state.publish(EntityKind::Budget, ChangeKind::Update, budget.id, budget.org_id);
    Ok(Json(LineItemResponse { line_item, budget }))
}

/// DELETE /api/v1/budget-items/{id} - Remove a line item
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/budget-items/{id}",
    tag = "Budgets",
    params(("id" = uuid::Uuid, Path, description = "Line item ID")),
    responses(
        (status = 200, description = "Budget with recomputed total", body = Budget),
        (status = 404, description = "Line item not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_line_item(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let budget = state.store.line_item_delete(auth.access(), id).await?;
    state.publish(EntityKind::BudgetLineItem, ChangeKind::Delete, id, budget.org_id);
    state.publish(EntityKind::Budget, ChangeKind::Update, budget.id, budget.org_id);
    Ok(Json(budget))
}

// ============================================================================
// ROUTERS
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_budgets).post(create_budget))
        .route("/from-template", post(create_from_template))
        .route("/:id", get(get_budget).patch(update_budget).delete(delete_budget))
        .route("/:id/items", post(add_line_items))
        .with_state(state)
}

/// Routes for `/api/v1/budget-items`.
pub fn create_line_item_router(state: AppState) -> Router {
    Router::new()
        .route("/:id", patch(update_line_item).delete(delete_line_item))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(category: &str, amount: Decimal) -> LineItemInput {
        LineItemInput {
            category: category.to_string(),
            description: String::new(),
            amount,
        }
    }

    #[test]
    fn test_line_items_bound_to_budget() -> Result<(), String> {
        let budget_id = uuid::Uuid::now_v7();
        let items = build_line_items(budget_id, vec![input("Personnel", Decimal::new(120050, 2))])
            .map_err(|e| e.to_string())?;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].budget_id, budget_id);
        assert_eq!(items[0].amount, Decimal::new(120050, 2));
        Ok(())
    }

    #[test]
    fn test_negative_amount_rejected() {
        let result = build_line_items(uuid::Uuid::now_v7(), vec![input("Travel", Decimal::from(-1))]);
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_category_rejected() {
        let result = build_line_items(uuid::Uuid::now_v7(), vec![input(" ", Decimal::from(10))]);
        assert!(result.is_err());
    }
}
