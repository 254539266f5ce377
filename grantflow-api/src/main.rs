//! Grantflow API Server Entry Point
//!
//! Reads configuration from the environment, applies the schema, wires the
//! automation engine and file storage, and starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use grantflow_api::telemetry::{init_tracer, TelemetryConfig};
use grantflow_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AppState, AuthConfig, DbConfig, EngineConfig,
    EngineNotifier, HttpEngineNotifier, LocalObjectStore, ObjectStore, PgStore, StorageConfig,
    WebhookConfig, WsState,
};
use grantflow_storage::GrantStore;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env();
    init_tracer(&telemetry_config)?;

    let db_config = DbConfig::from_env();
    let store = PgStore::from_config(&db_config)?;
    store.run_migrations().await?;
    let store: Arc<dyn GrantStore> = Arc::new(store);

    let api_config = ApiConfig::from_env();
    let auth_config = AuthConfig::from_env();
    let engine_config = EngineConfig::from_env();
    let storage_config = StorageConfig::from_env();
    let webhook_config = WebhookConfig::from_env();

    let notifier = HttpEngineNotifier::from_config(&engine_config)?
        .map(|n| Arc::new(n) as Arc<dyn EngineNotifier>);
    if notifier.is_none() {
        tracing::warn!("GRANTFLOW_ENGINE_BASE_URL is not set; workflows are recorded but never executed");
    }

    let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(storage_config.root.clone()));

    let ws = WsState::new(api_config.ws_capacity);

    let state = AppState::new(
        store,
        ws,
        notifier,
        objects,
        &api_config,
        storage_config,
        webhook_config,
    );
    let app = create_api_router(state, &api_config, auth_config)?;

    let addr: SocketAddr = api_config.bind_addr.parse().map_err(|e| {
        ApiError::invalid_input(format!("Invalid bind address {}: {}", api_config.bind_addr, e))
    })?;
    tracing::info!(%addr, "Starting Grantflow API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
