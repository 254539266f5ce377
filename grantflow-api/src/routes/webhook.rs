//! Automation Engine Callback Endpoint
//!
//! `POST /api/webhook` receives `{action, data}` envelopes from the engine.
//! It sits outside `/api/v1`: the engine has no user credentials, and the
//! receiver writes with service access. When a webhook secret is configured
//! the `X-Webhook-Secret` header must match it.
//!
//! Responses follow the engine contract: `{success: true}` or `{error}`.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use sha2::Sha256;

use crate::callback::{CallbackEnvelope, CallbackError};
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Compare secrets without leaking the position of the first mismatch.
///
/// Both values key an HMAC over the same message and the tags are compared
/// with `verify_slice`, which runs in constant time.
fn secrets_match(expected: &str, provided: &str) -> bool {
    const PROBE: &[u8] = b"grantflow-webhook-secret";

    let Ok(mut expected_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    expected_mac.update(PROBE);
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut provided_mac) = HmacSha256::new_from_slice(provided.as_bytes()) else {
        return false;
    };
    provided_mac.update(PROBE);
    provided_mac.verify_slice(&expected_tag).is_ok()
}

fn check_secret(secret: Option<&SecretString>, headers: &HeaderMap) -> Result<(), CallbackError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CallbackError::Unauthorized("Missing webhook secret".to_string()))?;
    if secrets_match(secret.expose_secret(), provided) {
        Ok(())
    } else {
        Err(CallbackError::Unauthorized("Invalid webhook secret".to_string()))
    }
}

/// POST /api/webhook - Apply an engine callback
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/webhook",
    tag = "Callbacks",
    request_body = CallbackEnvelope,
    responses(
        (status = 200, description = "Callback applied"),
        (status = 400, description = "Unknown action or malformed data"),
        (status = 401, description = "Missing or wrong webhook secret"),
        (status = 500, description = "Write failed"),
    ),
    security(("webhook_secret" = []))
))]
pub async fn receive_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, CallbackError> {
    if let Err(e) = check_secret(state.webhook_config.secret.as_ref(), &headers) {
        tracing::warn!(error = %e, "Rejected callback");
        return Err(e);
    }

    let envelope = CallbackEnvelope::from_slice(&body)?;
    state.callbacks.handle(envelope).await?;
    Ok(Json(json!({ "success": true })))
}

pub fn create_router(state: AppState) -> Router {
    if state.webhook_config.secret.is_none() {
        tracing::warn!(
            "GRANTFLOW_WEBHOOK_SECRET is not set; the callback endpoint accepts unauthenticated requests"
        );
    }

    Router::new()
        .route("/webhook", post(receive_callback))
        .with_state(state)
}
