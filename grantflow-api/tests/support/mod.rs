//! Shared harness for router-level tests.
//!
//! Builds the full application router over a `MemoryStore`, with one
//! organization holding an owner and a member, and a test API key.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use grantflow_api::{
    auth::generate_jwt_token,
    config::{ApiConfig, StorageConfig, WebhookConfig},
    create_api_router,
    dispatch::{EngineNotifier, EngineRequest, NotifyError},
    AppState, AuthConfig, LocalObjectStore, ObjectStore, WsState,
};
use grantflow_core::{EntityId, Organization, Profile};
use grantflow_storage::{GrantStore, MemoryStore};
use grantflow_test_utils::fixtures;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tower::ServiceExt;

pub const TEST_API_KEY: &str = "gf_test_key_0123456789";

/// Engine stand-in that records every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub calls: Mutex<Vec<(String, EngineRequest)>>,
}

#[async_trait]
impl EngineNotifier for RecordingNotifier {
    async fn notify(&self, path: &str, request: &EngineRequest) -> Result<(), NotifyError> {
        self.calls.lock().await.push((path.to_string(), request.clone()));
        Ok(())
    }
}

/// Engine stand-in that is always down.
pub struct FailingNotifier;

#[async_trait]
impl EngineNotifier for FailingNotifier {
    async fn notify(&self, _path: &str, _request: &EngineRequest) -> Result<(), NotifyError> {
        Err(NotifyError::Status(502))
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub objects: Arc<LocalObjectStore>,
    pub org: Organization,
    pub owner: Profile,
    pub member: Profile,
    pub owner_token: String,
    pub member_token: String,
    _storage_dir: tempfile::TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: JsonValue,
    pub bytes: Vec<u8>,
}

impl TestApp {
    pub async fn new(notifier: Option<Arc<dyn EngineNotifier>>) -> Result<Self, String> {
        Self::with_webhook(notifier, WebhookConfig::default()).await
    }

    pub async fn with_webhook(
        notifier: Option<Arc<dyn EngineNotifier>>,
        webhook_config: WebhookConfig,
    ) -> Result<Self, String> {
        let store = Arc::new(MemoryStore::new());
        let org = fixtures::organization();
        let owner = fixtures::owner(org.id);
        let member = fixtures::member(org.id);
        store.organization_insert(&org).await.map_err(|e| e.to_string())?;
        store.profile_insert(&owner).await.map_err(|e| e.to_string())?;
        store.profile_insert(&member).await.map_err(|e| e.to_string())?;

        let storage_dir = tempfile::tempdir().map_err(|e| e.to_string())?;
        let objects = Arc::new(LocalObjectStore::new(storage_dir.path()));

        let api_config = ApiConfig {
            rate_limit_enabled: false,
            ..Default::default()
        };
        let mut auth_config = AuthConfig::default();
        auth_config.add_api_key(TEST_API_KEY.to_string());

        let owner_token = generate_jwt_token(&auth_config, owner.id, None).map_err(|e| e.to_string())?;
        let member_token = generate_jwt_token(&auth_config, member.id, None).map_err(|e| e.to_string())?;

        let store_dyn: Arc<dyn GrantStore> = store.clone();
        let objects_dyn: Arc<dyn ObjectStore> = objects.clone();
        let state = AppState::new(
            store_dyn,
            WsState::new(64),
            notifier,
            objects_dyn,
            &api_config,
            StorageConfig::default(),
            webhook_config,
        );
        let router = create_api_router(state, &api_config, auth_config).map_err(|e| e.to_string())?;

        Ok(Self {
            router,
            store,
            objects,
            org,
            owner,
            member,
            owner_token,
            member_token,
            _storage_dir: storage_dir,
        })
    }

    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse, String> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| format!("{:?}", e))?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?
            .to_vec();
        let body = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
        };
        Ok(TestResponse { status, body, bytes })
    }

    /// Request as a signed-in user.
    pub async fn call(
        &self,
        token: &str,
        method: Method,
        uri: &str,
        body: Option<JsonValue>,
    ) -> Result<TestResponse, String> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token));
        self.send(with_json(builder, body)?).await
    }

    /// Request with the test API key acting in the test organization.
    pub async fn call_with_key(
        &self,
        method: Method,
        uri: &str,
        body: Option<JsonValue>,
    ) -> Result<TestResponse, String> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-api-key", TEST_API_KEY)
            .header("x-tenant-id", self.org.id.to_string());
        self.send(with_json(builder, body)?).await
    }

    /// Unauthenticated request, as the automation engine or a browser would send.
    pub async fn call_public(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<JsonValue>,
    ) -> Result<TestResponse, String> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(with_json(builder, body)?).await
    }
}

fn with_json(builder: axum::http::request::Builder, body: Option<JsonValue>) -> Result<Request<Body>, String> {
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .map_err(|e| e.to_string()),
        None => builder.body(Body::empty()).map_err(|e| e.to_string()),
    }
}

/// Read an id field from a JSON response.
pub fn id_of(body: &JsonValue, field: &str) -> Result<EntityId, String> {
    body.get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| format!("response has no {}: {}", field, body))?
        .parse()
        .map_err(|e| format!("bad uuid in {}: {}", field, e))
}

/// Wait for spawned notification tasks to run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
