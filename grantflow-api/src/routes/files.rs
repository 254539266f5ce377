//! Signed File Downloads
//!
//! `GET /files/{path}?expires=..&signature=..` streams a stored document.
//! The signature is the only credential, so links can be handed to browsers
//! and third parties until they expire.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::{
    error::{ApiError, ApiResult},
    object_store::SignatureQuery,
    state::AppState,
};

fn content_disposition(path: &str) -> HeaderValue {
    let name = path.rsplit('/').next().unwrap_or("file");
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// GET /files/{path} - Download through a signed URL
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/files/{path}",
    tag = "Documents",
    params(
        ("path" = String, Path, description = "Object path"),
        ("expires" = i64, Query, description = "Expiry, unix seconds"),
        ("signature" = String, Query, description = "Hex HMAC-SHA256 of path:expires"),
    ),
    responses(
        (status = 200, description = "File bytes", content_type = "application/octet-stream"),
        (status = 401, description = "Missing or invalid signature", body = ApiError),
        (status = 404, description = "File not found", body = ApiError),
        (status = 410, description = "Link expired", body = ApiError),
    ),
))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    query: Option<Query<SignatureQuery>>,
) -> ApiResult<Response> {
    let Query(query) = query.ok_or_else(|| ApiError::unauthorized("Download link is not signed"))?;
    state
        .signer
        .verify(&path, &query, chrono::Utc::now().timestamp())?;

    let bytes = state.objects.get(&path).await?;
    tracing::debug!(path = %path, size_bytes = bytes.len(), "Serving signed download");

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CONTENT_DISPOSITION, content_disposition(&path)),
        ],
        bytes,
    )
        .into_response())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/*path", get(download_file))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_uses_last_segment() {
        let value = content_disposition("org/doc/report.pdf");
        assert_eq!(value, HeaderValue::from_static("attachment; filename=\"report.pdf\""));
    }
}
