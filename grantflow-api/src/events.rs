//! WebSocket Event Types
//!
//! Events streamed to realtime subscribers. Row changes carry only the table,
//! change kind and ids; dashboards re-fetch the row themselves.

use grantflow_core::{ChangeKind, EntityId, EntityKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type")]
pub enum WsEvent {
    /// Sent once after the socket is upgraded.
    Connected {
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        org_id: EntityId,
    },

    /// A row in an organization's data was inserted, updated or deleted.
    RowChanged {
        table: EntityKind,
        change: ChangeKind,
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        record_id: EntityId,
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        org_id: EntityId,
    },

    /// The subscriber fell behind and events were dropped.
    Error { message: String },

    Disconnected { reason: String },
}

impl WsEvent {
    pub fn row_changed(table: EntityKind, change: ChangeKind, record_id: EntityId, org_id: EntityId) -> Self {
        WsEvent::RowChanged {
            table,
            change,
            record_id,
            org_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            WsEvent::Connected { .. } => "Connected",
            WsEvent::RowChanged { .. } => "RowChanged",
            WsEvent::Error { .. } => "Error",
            WsEvent::Disconnected { .. } => "Disconnected",
        }
    }

    /// Organization the event belongs to, if it is tenant-specific.
    pub fn org_id(&self) -> Option<EntityId> {
        match self {
            WsEvent::RowChanged { org_id, .. } => Some(*org_id),
            _ => None,
        }
    }

    pub fn is_tenant_specific(&self) -> bool {
        self.org_id().is_some()
    }
}
