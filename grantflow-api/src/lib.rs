//! Grantflow API - REST/WebSocket API Layer
//!
//! Multi-tenant grant management over HTTP. Every request is scoped to the
//! caller's organization. Long-running work (grant discovery, drafting,
//! budgeting, reporting) is handed to an external automation engine through
//! the workflow dispatcher, and its results come back through the callback
//! receiver at `/api/webhook`. Row changes are fanned out to WebSocket
//! subscribers of the owning organization.

#[macro_use]
mod macros;

pub mod auth;
pub mod callback;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod middleware;
pub mod object_store;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod ws;

// Re-export commonly used types
pub use auth::{
    authenticate, extract_tenant_id, generate_jwt_token, validate_jwt_token, AuthConfig, AuthContext,
    AuthMethod, Claims,
};
pub use callback::{CallbackAction, CallbackEnvelope, CallbackError, CallbackReceiver};
pub use config::{ApiConfig, EngineConfig, StorageConfig, WebhookConfig};
pub use db::{DbConfig, PgStore};
pub use dispatch::{Dispatcher, EngineNotifier, EngineRequest, HttpEngineNotifier, NotifyError};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use events::WsEvent;
pub use middleware::{auth_middleware, AuthExtractor, AuthMiddlewareState};
pub use object_store::{LocalObjectStore, ObjectStore, UrlSigner};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::AppState;
pub use ws::WsState;
