//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use grantflow_core::{ChangeKind, EntityId, EntityKind};
use grantflow_storage::GrantStore;

use crate::callback::CallbackReceiver;
use crate::config::{ApiConfig, StorageConfig, WebhookConfig};
use crate::dispatch::{Dispatcher, EngineNotifier};
use crate::object_store::{ObjectStore, UrlSigner};
use crate::ws::WsState;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn GrantStore>,
    pub ws: WsState,
    pub dispatcher: Dispatcher,
    pub callbacks: CallbackReceiver,
    /// Bytes of uploaded documents.
    pub objects: Arc<dyn ObjectStore>,
    pub signer: UrlSigner,
    pub storage_config: Arc<StorageConfig>,
    pub webhook_config: Arc<WebhookConfig>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the dispatcher and callback receiver to one store and one
    /// broadcast hub.
    pub fn new(
        store: Arc<dyn GrantStore>,
        ws: WsState,
        notifier: Option<Arc<dyn EngineNotifier>>,
        objects: Arc<dyn ObjectStore>,
        api_config: &ApiConfig,
        storage_config: StorageConfig,
        webhook_config: WebhookConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(store.clone(), ws.clone(), notifier, api_config.callback_url());
        let callbacks = CallbackReceiver::new(store.clone(), ws.clone());
        let signer = UrlSigner::new(&storage_config, api_config.public_base_url.clone());
        Self {
            store,
            ws,
            dispatcher,
            callbacks,
            objects,
            signer,
            storage_config: Arc::new(storage_config),
            webhook_config: Arc::new(webhook_config),
            start_time: Instant::now(),
        }
    }

    /// Announce a row change to realtime subscribers of `org_id`.
    pub fn publish(&self, table: EntityKind, change: ChangeKind, record_id: EntityId, org_id: EntityId) {
        self.ws.publish(table, change, record_id, org_id);
    }
}

crate::impl_from_ref!(WsState, ws);
crate::impl_from_ref!(Arc<dyn GrantStore>, store);
crate::impl_from_ref!(Dispatcher, dispatcher);
crate::impl_from_ref!(CallbackReceiver, callbacks);
