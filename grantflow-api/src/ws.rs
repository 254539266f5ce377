//! Realtime Change Notices over WebSocket
//!
//! Every write publishes a [`WsEvent::RowChanged`] on one in-process
//! broadcast channel. Each socket subscribes and forwards only its own
//! organization's events. The channel is bounded: a subscriber that falls
//! behind loses events and is told so with an `Error` event.

use crate::events::WsEvent;
use crate::middleware::AuthExtractor;
use crate::telemetry::METRICS;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use grantflow_core::{ChangeKind, EntityId, EntityKind};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Broadcast hub shared by writers and socket tasks.
#[derive(Clone)]
pub struct WsState {
    tx: broadcast::Sender<WsEvent>,
}

impl WsState {
    /// `capacity` bounds how far a subscriber may lag before losing events.
    /// Zero is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send an event to every subscriber. Never blocks; with no subscribers
    /// the event is dropped.
    pub fn broadcast(&self, event: WsEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "Broadcast event"),
            Err(_) => debug!(event_type, "No receivers for event"),
        }
    }

    /// Publish a row change notice.
    pub fn publish(&self, table: EntityKind, change: ChangeKind, record_id: EntityId, org_id: EntityId) {
        self.broadcast(WsEvent::row_changed(table, change, record_id, org_id));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.tx.subscribe()
    }
}

/// `GET /api/v1/realtime`: upgrade to a change-notice stream for the
/// caller's organization.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/realtime",
    tag = "Realtime",
    responses(
        (status = 101, description = "Switching to WebSocket"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []), ("api_key" = []))
))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    AuthExtractor(auth): AuthExtractor,
) -> Response {
    let org_id = auth.org_id;
    info!(org_id = %org_id, user_id = %auth.user_id, "WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state, org_id))
}

async fn handle_socket(socket: WebSocket, state: WsState, org_id: EntityId) {
    info!(org_id = %org_id, "WebSocket connected");
    if let Ok(m) = METRICS.as_ref() {
        m.ws_connected();
    }

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.subscribe();

    if let Err(e) = send_event(&mut sender, WsEvent::Connected { org_id }).await {
        error!(org_id = %org_id, error = %e, "Failed to send Connected event");
        if let Ok(m) = METRICS.as_ref() {
            m.ws_disconnected();
        }
        return;
    }

    // Client frames are only watched for close; pings are answered by axum.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(org_id = %org_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !should_send_event(&event, org_id) {
                            continue;
                        }
                        if let Err(e) = send_event(&mut sender, event).await {
                            error!(org_id = %org_id, error = %e, "Failed to send event, closing connection");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(org_id = %org_id, skipped, "Client lagged, some events were dropped");
                        let lagged = WsEvent::Error {
                            message: format!("Lagged: {} events dropped", skipped),
                        };
                        if let Err(e) = send_event(&mut sender, lagged).await {
                            error!(org_id = %org_id, error = %e, "Failed to send error event");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(org_id = %org_id, "Broadcast channel closed");
                        break;
                    }
                }
            }
            _ = &mut recv_task => {
                debug!(org_id = %org_id, "Receiver task finished");
                break;
            }
        }
    }

    recv_task.abort();
    let _ = send_event(
        &mut sender,
        WsEvent::Disconnected {
            reason: "Connection closed".to_string(),
        },
    )
    .await;

    if let Ok(m) = METRICS.as_ref() {
        m.ws_disconnected();
    }
    info!(org_id = %org_id, "WebSocket disconnected");
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: WsEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(&event).map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}

/// Tenant events go only to sockets of the same organization.
fn should_send_event(event: &WsEvent, client_org_id: EntityId) -> bool {
    event.org_id().map_or(true, |org_id| org_id == client_org_id)
}
