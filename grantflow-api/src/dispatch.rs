//! Workflow Dispatch
//!
//! Hands work to the external automation engine. A dispatch writes one
//! `running` ledger row and then fires a single best-effort POST at the
//! engine from a spawned task. The caller gets the ledger id back right away;
//! the engine reports results later through the callback receiver.
//!
//! There is no retry and no timeout detection. A failed notification leaves
//! the row `running` and is only logged and counted.

use crate::config::EngineConfig;
use crate::error::{ApiError, ApiResult};
use crate::telemetry::{NotifyOutcome, METRICS};
use crate::ws::WsState;
use async_trait::async_trait;
use grantflow_core::{ChangeKind, EntityId, EntityKind, WorkflowExecution, WorkflowKind};
use grantflow_storage::{Access, GrantStore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Body posted to `{engine}/webhook/{workflow_name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EngineRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub workflow_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub org_id: EntityId,
    pub workflow_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub entity_id: Option<EntityId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub parameters: JsonValue,
    pub callback_url: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("request to automation engine failed: {0}")]
    Transport(String),

    #[error("automation engine responded with status {0}")]
    Status(u16),
}

/// Outbound channel to the automation engine.
#[async_trait]
pub trait EngineNotifier: Send + Sync {
    /// Post `request` to the engine endpoint at `path`.
    async fn notify(&self, path: &str, request: &EngineRequest) -> Result<(), NotifyError>;
}

/// [`EngineNotifier`] over reqwest.
pub struct HttpEngineNotifier {
    client: reqwest::Client,
    base_url: String,
    secret: Option<SecretString>,
}

impl std::fmt::Debug for HttpEngineNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEngineNotifier")
            .field("base_url", &self.base_url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpEngineNotifier {
    /// `Ok(None)` when no engine base URL is configured.
    pub fn from_config(config: &EngineConfig) -> ApiResult<Option<Self>> {
        let Some(base_url) = config.base_url.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Some(Self {
            client,
            base_url,
            secret: config.secret.clone(),
        }))
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl EngineNotifier for HttpEngineNotifier {
    async fn notify(&self, path: &str, request: &EngineRequest) -> Result<(), NotifyError> {
        let mut builder = self
            .client
            .post(self.endpoint(path))
            .header("User-Agent", "Grantflow-Dispatch/1.0")
            .json(request);
        if let Some(secret) = &self.secret {
            builder = builder.header("X-Webhook-Secret", secret.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(response.status().as_u16()))
        }
    }
}

/// Records ledger rows and notifies the engine.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn GrantStore>,
    ws: WsState,
    notifier: Option<Arc<dyn EngineNotifier>>,
    callback_url: String,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("engine_configured", &self.notifier.is_some())
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn GrantStore>,
        ws: WsState,
        notifier: Option<Arc<dyn EngineNotifier>>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ws,
            notifier,
            callback_url: callback_url.into(),
        }
    }

    pub fn is_engine_configured(&self) -> bool {
        self.notifier.is_some()
    }

    /// Verify the target, write the ledger row and start the notification.
    ///
    /// Fails without contacting the engine when the target entity is not
    /// visible to `org_id` or the ledger insert fails.
    pub async fn dispatch(
        &self,
        org_id: EntityId,
        kind: WorkflowKind,
        entity_id: Option<EntityId>,
        parameters: JsonValue,
    ) -> ApiResult<WorkflowExecution> {
        let access = Access::Tenant(org_id);
        if let Some(target) = kind.target_entity() {
            let id = entity_id.ok_or_else(|| ApiError::missing_field("entity_id"))?;
            self.require_visible(access, target, id).await?;
        }
        if kind == WorkflowKind::CustomizeNarrative {
            if let Some(grant_id) = grant_parameter(&parameters)? {
                self.require_visible(access, EntityKind::Grant, grant_id).await?;
            }
        }

        let execution = WorkflowExecution::running(org_id, kind, entity_id, parameters);
        self.store.workflow_insert(access, &execution).await?;

        self.ws.publish(
            EntityKind::WorkflowExecution,
            ChangeKind::Insert,
            execution.id,
            org_id,
        );
        if let Ok(m) = METRICS.as_ref() {
            m.record_dispatch(kind.workflow_name());
        }
        info!(
            workflow_id = %execution.id,
            workflow = kind.workflow_name(),
            org_id = %org_id,
            entity_id = ?entity_id,
            "Workflow dispatched"
        );

        self.notify(kind, &execution);
        Ok(execution)
    }

    fn notify(&self, kind: WorkflowKind, execution: &WorkflowExecution) {
        let workflow = kind.workflow_name();
        let Some(notifier) = self.notifier.clone() else {
            warn!(
                workflow_id = %execution.id,
                workflow,
                "Automation engine not configured, skipping notification"
            );
            if let Ok(m) = METRICS.as_ref() {
                m.record_notification(workflow, NotifyOutcome::Skipped);
            }
            return;
        };

        let request = EngineRequest {
            workflow_id: execution.id,
            org_id: execution.org_id,
            workflow_name: execution.workflow_name.clone(),
            entity_id: execution.entity_id,
            parameters: execution.parameters.clone(),
            callback_url: self.callback_url.clone(),
        };
        let path = kind.engine_path();

        tokio::spawn(async move {
            match notifier.notify(&path, &request).await {
                Ok(()) => {
                    debug!(workflow_id = %request.workflow_id, workflow, "Automation engine notified");
                    if let Ok(m) = METRICS.as_ref() {
                        m.record_notification(workflow, NotifyOutcome::Notified);
                    }
                }
                Err(e) => {
                    warn!(
                        workflow_id = %request.workflow_id,
                        workflow,
                        error = %e,
                        "Automation engine notification failed"
                    );
                    if let Ok(m) = METRICS.as_ref() {
                        m.record_notification(workflow, NotifyOutcome::Failed);
                    }
                }
            }
        });
    }

    async fn require_visible(&self, access: Access, kind: EntityKind, id: EntityId) -> ApiResult<()> {
        let store = self.store.as_ref();
        let found = match kind {
            EntityKind::Grant => store.grant_get(access, id).await?.is_some(),
            EntityKind::Proposal => store.proposal_get(access, id).await?.is_some(),
            EntityKind::Funder => store.funder_get(access, id).await?.is_some(),
            EntityKind::Narrative => store.narrative_get(access, id).await?.is_some(),
            EntityKind::Budget => store.budget_get(access, id).await?.is_some(),
            EntityKind::Report => store.report_get(access, id).await?.is_some(),
            EntityKind::Document => store.document_get(access, id).await?.is_some(),
            other => {
                return Err(ApiError::internal_error(format!(
                    "{} cannot be a workflow target",
                    other.label()
                )))
            }
        };
        if found {
            Ok(())
        } else {
            Err(ApiError::entity_not_found(kind.label(), id))
        }
    }
}

/// Optional `grant_id` carried in the parameters of a narrative customization.
fn grant_parameter(parameters: &JsonValue) -> ApiResult<Option<EntityId>> {
    match parameters.get("grant_id") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(raw)) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::invalid_format("grant_id", "UUID")),
        Some(_) => Err(ApiError::invalid_format("grant_id", "UUID")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use grantflow_core::{new_entity_id, WorkflowStatus};
    use grantflow_storage::{MemoryStore, WorkflowFilter};
    use grantflow_test_utils::fixtures;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct RecordingNotifier {
        tx: mpsc::UnboundedSender<(String, EngineRequest)>,
    }

    #[async_trait]
    impl EngineNotifier for RecordingNotifier {
        async fn notify(&self, path: &str, request: &EngineRequest) -> Result<(), NotifyError> {
            let _ = self.tx.send((path.to_string(), request.clone()));
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl EngineNotifier for FailingNotifier {
        async fn notify(&self, _path: &str, _request: &EngineRequest) -> Result<(), NotifyError> {
            Err(NotifyError::Transport("connection refused".to_string()))
        }
    }

    async fn seeded() -> Result<(Arc<MemoryStore>, EntityId, EntityId), String> {
        let store = Arc::new(MemoryStore::new());
        let org = fixtures::organization();
        store.organization_insert(&org).await.map_err(|e| e.to_string())?;
        let budget = fixtures::budget(org.id);
        store
            .budget_create(Access::Tenant(org.id), &budget, &[])
            .await
            .map_err(|e| e.to_string())?;
        Ok((store, org.id, budget.id))
    }

    fn dispatcher(store: Arc<MemoryStore>, notifier: Option<Arc<dyn EngineNotifier>>) -> Dispatcher {
        Dispatcher::new(store, WsState::new(16), notifier, "http://api.test/api/webhook")
    }

    #[tokio::test]
    async fn test_dispatch_records_running_row_and_notifies() -> Result<(), String> {
        let (store, org_id, budget_id) = seeded().await?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let d = dispatcher(store.clone(), Some(Arc::new(RecordingNotifier { tx })));

        let execution = d
            .dispatch(org_id, WorkflowKind::GenerateBudget, Some(budget_id), json!({"tone": "formal"}))
            .await
            .map_err(|e| e.message)?;

        assert_eq!(execution.workflow_name, "generate-budget");
        assert_eq!(execution.status, WorkflowStatus::Running);
        let stored = store
            .workflow_get(Access::Tenant(org_id), execution.id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or("ledger row missing")?;
        assert_eq!(stored, execution);

        let (path, request) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .map_err(|_| "notification not sent")?
            .ok_or("notifier dropped")?;
        assert_eq!(path, "/webhook/generate-budget");
        assert_eq!(request.workflow_id, execution.id);
        assert_eq!(request.entity_id, Some(budget_id));
        assert_eq!(request.callback_url, "http://api.test/api/webhook");
        assert_eq!(request.parameters["tone"], "formal");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_ledger_row() -> Result<(), String> {
        let (store, org_id, budget_id) = seeded().await?;
        let d = dispatcher(store.clone(), Some(Arc::new(FailingNotifier)));

        let execution = d
            .dispatch(org_id, WorkflowKind::GenerateBudget, Some(budget_id), json!({}))
            .await
            .map_err(|e| e.message)?;
        tokio::task::yield_now().await;

        let rows = store
            .workflow_list(Access::Tenant(org_id), &WorkflowFilter::default())
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, execution.id);
        assert_eq!(rows[0].status, WorkflowStatus::Running);
        Ok(())
    }

    #[tokio::test]
    async fn test_unconfigured_engine_still_records() -> Result<(), String> {
        let (store, org_id, budget_id) = seeded().await?;
        let d = dispatcher(store.clone(), None);
        assert!(!d.is_engine_configured());

        d.dispatch(org_id, WorkflowKind::GenerateBudget, Some(budget_id), json!({}))
            .await
            .map_err(|e| e.message)?;
        assert_eq!(store.workflow_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_target_is_not_found_and_writes_nothing() -> Result<(), String> {
        let (store, org_id, _) = seeded().await?;
        let d = dispatcher(store.clone(), None);

        let err = d
            .dispatch(org_id, WorkflowKind::ScreenEligibility, Some(new_entity_id()), json!({}))
            .await
            .err()
            .ok_or("dispatch should fail")?;
        assert_eq!(err.code, ErrorCode::EntityNotFound);
        assert_eq!(store.workflow_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_other_orgs_entity_is_invisible() -> Result<(), String> {
        let (store, _, budget_id) = seeded().await?;
        let other = fixtures::organization();
        store.organization_insert(&other).await.map_err(|e| e.to_string())?;
        let d = dispatcher(store.clone(), None);

        let err = d
            .dispatch(other.id, WorkflowKind::GenerateBudget, Some(budget_id), json!({}))
            .await
            .err()
            .ok_or("dispatch should fail")?;
        assert_eq!(err.code, ErrorCode::EntityNotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_target_required_for_entity_workflows() -> Result<(), String> {
        let (store, org_id, _) = seeded().await?;
        let d = dispatcher(store, None);
        let err = d
            .dispatch(org_id, WorkflowKind::GenerateBudget, None, json!({}))
            .await
            .err()
            .ok_or("dispatch should fail")?;
        assert_eq!(err.code, ErrorCode::MissingField);
        Ok(())
    }

    #[tokio::test]
    async fn test_discovery_needs_no_target() -> Result<(), String> {
        let (store, org_id, _) = seeded().await?;
        let d = dispatcher(store, None);
        let execution = d
            .dispatch(org_id, WorkflowKind::DiscoverGrants, None, json!({"keywords": ["arts"]}))
            .await
            .map_err(|e| e.message)?;
        assert_eq!(execution.workflow_name, "discover-grants");
        assert_eq!(execution.entity_id, None);
        Ok(())
    }

    #[test]
    fn test_grant_parameter_parsing() {
        let id = new_entity_id();
        assert_eq!(grant_parameter(&json!({})).ok(), Some(None));
        assert_eq!(grant_parameter(&json!({"grant_id": id.to_string()})).ok(), Some(Some(id)));
        assert!(grant_parameter(&json!({"grant_id": 42})).is_err());
    }

    #[test]
    fn test_engine_request_omits_missing_entity() -> Result<(), serde_json::Error> {
        let request = EngineRequest {
            workflow_id: new_entity_id(),
            org_id: new_entity_id(),
            workflow_name: "discover-grants".to_string(),
            entity_id: None,
            parameters: json!({}),
            callback_url: "http://localhost:3000/api/webhook".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        assert!(value.get("entity_id").is_none());
        assert_eq!(value["workflow_name"], "discover-grants");
        Ok(())
    }

    #[test]
    fn test_http_notifier_absent_without_base_url() -> Result<(), String> {
        let notifier = HttpEngineNotifier::from_config(&EngineConfig::default()).map_err(|e| e.message)?;
        assert!(notifier.is_none());

        let config = EngineConfig {
            base_url: Some("http://engine:5678".to_string()),
            ..Default::default()
        };
        let notifier = HttpEngineNotifier::from_config(&config)
            .map_err(|e| e.message)?
            .ok_or("notifier should be built")?;
        assert_eq!(notifier.endpoint("/webhook/auto-submit"), "http://engine:5678/webhook/auto-submit");
        Ok(())
    }
}
