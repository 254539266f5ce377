//! Router-level tests over the in-memory store.
//!
//! Each test drives the full application router: authentication, tenant
//! scoping, workflow dispatch, engine callbacks and signed downloads.

mod support;

use std::str::FromStr;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use grantflow_api::config::WebhookConfig;
use grantflow_api::ObjectStore;
use grantflow_core::{Document, WorkflowStatus};
use grantflow_storage::{Access, GrantStore};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::json;

use support::{id_of, settle, FailingNotifier, RecordingNotifier, TestApp};

async fn create_grant(app: &TestApp, title: &str) -> Result<uuid::Uuid, String> {
    let response = app
        .call(&app.owner_token, Method::POST, "/api/v1/grants", Some(json!({ "title": title })))
        .await?;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    id_of(&response.body, "id")
}

fn decimal_field(body: &serde_json::Value, field: &str) -> Result<Decimal, String> {
    let raw = body.get(field).ok_or_else(|| format!("missing {}", field))?;
    match raw {
        serde_json::Value::String(s) => Decimal::from_str(s).map_err(|e| e.to_string()),
        other => Decimal::from_str(&other.to_string()).map_err(|e| e.to_string()),
    }
}

// ============================================================================
// AUTHENTICATION AND ROLES
// ============================================================================

#[tokio::test]
async fn test_requests_without_credentials_are_rejected() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let response = app.call_public(Method::GET, "/api/v1/grants", &[], None).await?;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_me_reports_profile_and_organization() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let response = app.call(&app.member_token, Method::GET, "/api/v1/me", None).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(id_of(&response.body, "org_id")?, app.org.id);
    assert_eq!(response.body["role"], "member");
    assert_eq!(response.body["auth_method"], "jwt");
    Ok(())
}

#[tokio::test]
async fn test_api_key_acts_in_tenant_header_organization() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let response = app.call_with_key(Method::GET, "/api/v1/organization", None).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(id_of(&response.body, "id")?, app.org.id);
    Ok(())
}

#[tokio::test]
async fn test_member_cannot_delete_grant_but_owner_can() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let grant_id = create_grant(&app, "Youth Theatre Fund").await?;
    let uri = format!("/api/v1/grants/{}", grant_id);

    let denied = app.call(&app.member_token, Method::DELETE, &uri, None).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let deleted = app.call(&app.owner_token, Method::DELETE, &uri, None).await?;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let gone = app.call(&app.owner_token, Method::GET, &uri, None).await?;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_empty_patch_is_rejected() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let grant_id = create_grant(&app, "Rural Libraries").await?;
    let response = app
        .call(
            &app.owner_token,
            Method::PATCH,
            &format!("/api/v1/grants/{}", grant_id),
            Some(json!({})),
        )
        .await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    Ok(())
}

// ============================================================================
// WORKFLOW DISPATCH
// ============================================================================

#[tokio::test]
async fn test_trigger_records_running_row_and_notifies_engine() -> Result<(), String> {
    let notifier = Arc::new(RecordingNotifier::default());
    let app = TestApp::new(Some(notifier.clone())).await?;

    let budget = app
        .call(
            &app.owner_token,
            Method::POST,
            "/api/v1/budgets",
            Some(json!({ "name": "FY26 Operating" })),
        )
        .await?;
    assert_eq!(budget.status, StatusCode::CREATED, "{}", budget.body);
    let budget_id = id_of(&budget.body, "id")?;

    let response = app
        .call(
            &app.owner_token,
            Method::POST,
            "/api/v1/workflows/generate-budget",
            Some(json!({ "entity_id": budget_id, "parameters": { "total_target": 50000 } })),
        )
        .await?;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.body["success"], true);
    let workflow_id = id_of(&response.body, "workflowId")?;

    let row = app
        .store
        .workflow_get(Access::Service, workflow_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("ledger row missing")?;
    assert_eq!(row.status, WorkflowStatus::Running);
    assert_eq!(row.workflow_name, "generate-budget");
    assert_eq!(row.entity_id, Some(budget_id));
    assert_eq!(row.org_id, app.org.id);

    settle().await;
    let calls = notifier.calls.lock().await;
    assert_eq!(calls.len(), 1);
    let (path, request) = &calls[0];
    assert_eq!(path, "/webhook/generate-budget");
    assert_eq!(request.workflow_id, workflow_id);
    assert_eq!(request.parameters, json!({ "total_target": 50000 }));
    assert!(request.callback_url.ends_with("/api/webhook"));
    Ok(())
}

#[tokio::test]
async fn test_engine_failure_leaves_running_row() -> Result<(), String> {
    let app = TestApp::new(Some(Arc::new(FailingNotifier))).await?;

    let response = app
        .call(
            &app.owner_token,
            Method::POST,
            "/api/v1/workflows/discover-grants",
            Some(json!({ "parameters": { "keywords": ["arts"] } })),
        )
        .await?;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    let workflow_id = id_of(&response.body, "workflowId")?;

    settle().await;
    let row = app
        .call(&app.owner_token, Method::GET, &format!("/api/v1/workflows/{}", workflow_id), None)
        .await?;
    assert_eq!(row.status, StatusCode::OK);
    assert_eq!(row.body["status"], "running");
    Ok(())
}

#[tokio::test]
async fn test_trigger_rejects_unknown_kind_and_missing_target() -> Result<(), String> {
    let app = TestApp::new(None).await?;

    let unknown = app
        .call(&app.owner_token, Method::POST, "/api/v1/workflows/make-coffee", Some(json!({})))
        .await?;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let missing = app
        .call(&app.owner_token, Method::POST, "/api/v1/workflows/screen-eligibility", Some(json!({})))
        .await?;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let foreign = app
        .call(
            &app.owner_token,
            Method::POST,
            "/api/v1/workflows/screen-eligibility",
            Some(json!({ "entity_id": uuid::Uuid::now_v7() })),
        )
        .await?;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);

    assert_eq!(app.store.workflow_count().await, 0);
    Ok(())
}

// ============================================================================
// ENGINE CALLBACKS
// ============================================================================

#[tokio::test]
async fn test_insert_checklist_callback_computes_completion() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let grant_id = create_grant(&app, "Arts Access").await?;

    let response = app
        .call_public(
            Method::POST,
            "/api/webhook",
            &[],
            Some(json!({
                "action": "insert_checklist",
                "data": {
                    "grant_id": grant_id,
                    "items": [
                        { "label": "Budget", "completed": true },
                        { "label": "Narrative", "completed": false },
                        { "label": "Letters", "completed": true },
                        { "label": "Board list", "completed": false }
                    ]
                }
            })),
        )
        .await?;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.body, json!({ "success": true }));

    let checklist = app
        .call(&app.member_token, Method::GET, &format!("/api/v1/checklists/{}", grant_id), None)
        .await?;
    assert_eq!(checklist.status, StatusCode::OK);
    assert_eq!(checklist.body["completion_percentage"], 50);
    Ok(())
}

#[tokio::test]
async fn test_unknown_callback_action_is_rejected() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let before = app.store.row_count().await;

    let response = app
        .call_public(Method::POST, "/api/webhook", &[], Some(json!({ "action": "bogus", "data": {} })))
        .await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body, json!({ "error": "Unknown action: bogus" }));
    assert_eq!(app.store.row_count().await, before);
    Ok(())
}

#[tokio::test]
async fn test_update_workflow_callback_completes_ledger_row() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let trigger = app
        .call(&app.owner_token, Method::POST, "/api/v1/workflows/discover-grants", None)
        .await?;
    assert_eq!(trigger.status, StatusCode::OK, "{}", trigger.body);
    let workflow_id = id_of(&trigger.body, "workflowId")?;

    let callback = app
        .call_public(
            Method::POST,
            "/api/webhook",
            &[],
            Some(json!({
                "action": "update_workflow",
                "data": { "workflow_id": workflow_id, "status": "completed", "result": { "found": 3 } }
            })),
        )
        .await?;
    assert_eq!(callback.status, StatusCode::OK, "{}", callback.body);

    let row = app
        .call(&app.owner_token, Method::GET, &format!("/api/v1/workflows/{}", workflow_id), None)
        .await?;
    assert_eq!(row.body["status"], "completed");
    assert!(!row.body["completed_at"].is_null());
    Ok(())
}

#[tokio::test]
async fn test_webhook_secret_is_enforced_when_configured() -> Result<(), String> {
    let app = TestApp::with_webhook(
        None,
        WebhookConfig {
            secret: Some(SecretString::from("hook-secret")),
        },
    )
    .await?;
    let body = json!({ "action": "bogus" });

    let missing = app
        .call_public(Method::POST, "/api/webhook", &[], Some(body.clone()))
        .await?;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let accepted = app
        .call_public(
            Method::POST,
            "/api/webhook",
            &[("x-webhook-secret", "hook-secret")],
            Some(body),
        )
        .await?;
    // Past the secret check, so the action itself is what gets rejected.
    assert_eq!(accepted.status, StatusCode::BAD_REQUEST);
    Ok(())
}

// ============================================================================
// BUDGETS
// ============================================================================

#[tokio::test]
async fn test_budget_total_tracks_line_items() -> Result<(), String> {
    let app = TestApp::new(None).await?;

    let created = app
        .call(
            &app.owner_token,
            Method::POST,
            "/api/v1/budgets",
            Some(json!({
                "name": "Program Budget",
                "line_items": [
                    { "category": "personnel", "description": "Coordinator", "amount": "1200.50" },
                    { "category": "supplies", "amount": "300.25" }
                ]
            })),
        )
        .await?;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    assert_eq!(decimal_field(&created.body, "total_amount")?, Decimal::new(150075, 2));
    let budget_id = id_of(&created.body, "id")?;

    let added = app
        .call(
            &app.owner_token,
            Method::POST,
            &format!("/api/v1/budgets/{}/items", budget_id),
            Some(json!({ "line_items": [ { "category": "travel", "amount": "99.25" } ] })),
        )
        .await?;
    assert_eq!(added.status, StatusCode::CREATED, "{}", added.body);
    assert_eq!(decimal_field(&added.body, "total_amount")?, Decimal::new(1600, 0));

    let first_item = added.body["line_items"][0]["id"]
        .as_str()
        .ok_or("no line items")?
        .to_string();
    let removed = app
        .call(
            &app.owner_token,
            Method::DELETE,
            &format!("/api/v1/budget-items/{}", first_item),
            None,
        )
        .await?;
    assert_eq!(removed.status, StatusCode::OK, "{}", removed.body);

    let detail = app
        .call(&app.owner_token, Method::GET, &format!("/api/v1/budgets/{}", budget_id), None)
        .await?;
    let items = detail.body["line_items"].as_array().ok_or("no line items")?;
    let sum = items
        .iter()
        .map(|item| decimal_field(item, "amount"))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .sum::<Decimal>();
    assert_eq!(items.len(), 2);
    assert_eq!(decimal_field(&detail.body, "total_amount")?, sum);
    Ok(())
}

#[tokio::test]
async fn test_negative_line_item_is_rejected() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let response = app
        .call(
            &app.owner_token,
            Method::POST,
            "/api/v1/budgets",
            Some(json!({
                "name": "Bad Budget",
                "line_items": [ { "category": "refund", "amount": "-5" } ]
            })),
        )
        .await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    Ok(())
}

// ============================================================================
// DOCUMENTS
// ============================================================================

#[tokio::test]
async fn test_signed_url_round_trip() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let mut document = Document::new(app.org.id, "budget.pdf", "application/pdf", 4, "");
    document.storage_path = format!("{}/{}/budget.pdf", app.org.id, document.id);
    app.objects
        .put(&document.storage_path, b"%PDF")
        .await
        .map_err(|e| e.to_string())?;
    app.store
        .document_insert(Access::Tenant(app.org.id), &document)
        .await
        .map_err(|e| e.to_string())?;

    let signed = app
        .call(
            &app.member_token,
            Method::GET,
            &format!("/api/v1/documents/{}/url", document.id),
            None,
        )
        .await?;
    assert_eq!(signed.status, StatusCode::OK, "{}", signed.body);
    let url = signed.body["url"].as_str().ok_or("no url")?;
    let path_and_query = url
        .find("/files/")
        .map(|start| &url[start..])
        .ok_or("url has no /files/ segment")?;

    let download = app.call_public(Method::GET, path_and_query, &[], None).await?;
    assert_eq!(download.status, StatusCode::OK);
    assert_eq!(download.bytes, b"%PDF".to_vec());

    let tampered = path_and_query.replace("budget.pdf", "other.pdf");
    let rejected = app.call_public(Method::GET, &tampered, &[], None).await?;
    assert_eq!(rejected.status, StatusCode::UNAUTHORIZED);

    let unsigned = app
        .call_public(Method::GET, &format!("/files/{}", document.storage_path), &[], None)
        .await?;
    assert_eq!(unsigned.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

// ============================================================================
// HEALTH
// ============================================================================

#[tokio::test]
async fn test_readiness_is_degraded_without_engine() -> Result<(), String> {
    let app = TestApp::new(None).await?;
    let response = app.call_public(Method::GET, "/health/ready", &[], None).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "degraded");
    Ok(())
}
