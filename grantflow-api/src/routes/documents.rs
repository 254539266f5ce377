//! Document REST API Routes
//!
//! Uploads arrive as `multipart/form-data` with a `file` part and optional
//! `grant_id` and `category` text parts. The bytes go to the object store
//! first and the metadata row second; if the row cannot be written the
//! object is removed again.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use grantflow_core::{
    CategorySource, ChangeKind, Document, DocumentPatch, EntityId, EntityKind,
};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    object_store::{document_path, validate_upload, SignedUrl},
    state::AppState,
};

/// Room for multipart boundaries and the small text parts.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ListDocumentsQuery {
    #[cfg_attr(feature = "openapi", param(value_type = Option<String>))]
    pub grant_id: Option<EntityId>,
}

/// Form accepted by the upload endpoint.
#[cfg(feature = "openapi")]
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadDocumentForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    grant_id: Option<uuid::Uuid>,
    category: Option<String>,
}

/// Parts of an upload after the multipart stream has been drained.
#[derive(Debug, Default)]
struct UploadParts {
    file: Option<UploadedFile>,
    grant_id: Option<EntityId>,
    category: Option<String>,
}

#[derive(Debug)]
struct UploadedFile {
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

fn multipart_error(e: MultipartError, limit: u64) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(limit)
    } else {
        ApiError::invalid_input(format!("Invalid multipart field: {}", e))
    }
}

async fn read_upload(mut multipart: Multipart, limit: u64) -> ApiResult<UploadParts> {
    let mut parts = UploadParts::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(|s| s.to_string()).unwrap_or_default();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| ApiError::missing_field("file name"))?;
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                parts.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "grant_id" => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                let text = text.trim();
                if !text.is_empty() {
                    let id = uuid::Uuid::parse_str(text)
                        .map_err(|_| ApiError::invalid_format("grant_id", "valid UUID"))?;
                    parts.grant_id = Some(id);
                }
            }
            "category" => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                let text = text.trim();
                if !text.is_empty() {
                    parts.category = Some(text.to_string());
                }
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(parts)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/documents - Upload a document
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/documents",
    tag = "Documents",
    request_body(content = UploadDocumentForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Document stored", body = Document),
        (status = 400, description = "Empty file or disallowed content type", body = ApiError),
        (status = 413, description = "File too large", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn upload_document(
    State(state): State<AppState>,
    auth: AuthExtractor,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let limit = state.storage_config.max_upload_bytes;
    let parts = read_upload(multipart, limit).await?;
    let file = parts.file.ok_or_else(|| ApiError::missing_field("file"))?;
    validate_upload(&state.storage_config, &file.content_type, file.bytes.len())?;

    let mut document = Document::new(
        auth.org_id,
        file.file_name,
        file.content_type,
        file.bytes.len() as i64,
        String::new(),
    );
    document.storage_path = document_path(auth.org_id, document.id, &document.file_name);
    document.grant_id = parts.grant_id;
    if let Some(category) = parts.category {
        document.category = Some(category);
        document.category_source = Some(CategorySource::User);
    }

    state.objects.put(&document.storage_path, &file.bytes).await?;
    if let Err(e) = state.store.document_insert(auth.access(), &document).await {
        if let Err(cleanup) = state.objects.delete(&document.storage_path).await {
            tracing::warn!(path = %document.storage_path, error = %cleanup, "Failed to remove orphaned upload");
        }
        return Err(e.into());
    }

    tracing::info!(
        document_id = %document.id,
        size_bytes = document.size_bytes,
        content_type = %document.content_type,
        "Document uploaded"
    );
    state.publish(EntityKind::Document, ChangeKind::Insert, document.id, document.org_id);
    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /api/v1/documents - List documents, optionally for one grant
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/documents",
    tag = "Documents",
    params(ListDocumentsQuery),
    responses((status = 200, description = "Documents", body = Vec<Document>)),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn list_documents(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Query(query): Query<ListDocumentsQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.document_list(auth.access(), query.grant_id).await?))
}

async fn load_document(state: &AppState, auth: &AuthExtractor, id: EntityId) -> ApiResult<Document> {
    state
        .store
        .document_get(auth.access(), id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("Document", id))
}

/// GET /api/v1/documents/{id} - Get document metadata
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/documents/{id}",
    tag = "Documents",
    params(("id" = uuid::Uuid, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Document", body = Document),
        (status = 404, description = "Document not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn get_document(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(load_document(&state, &auth, id).await?))
}

/// GET /api/v1/documents/{id}/url - Signed download URL
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/documents/{id}/url",
    tag = "Documents",
    params(("id" = uuid::Uuid, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Signed URL", body = SignedUrl),
        (status = 404, description = "Document not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn document_url(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    let document = load_document(&state, &auth, id).await?;
    let signed = state
        .signer
        .signed_url(&document.storage_path, chrono::Utc::now().timestamp())?;
    Ok(Json(signed))
}

/// PATCH /api/v1/documents/{id} - Rename, attach to a grant or categorize
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/documents/{id}",
    tag = "Documents",
    params(("id" = uuid::Uuid, Path, description = "Document ID")),
    request_body = DocumentPatch,
    responses(
        (status = 200, description = "Document updated", body = Document),
        (status = 404, description = "Document not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn update_document(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
    Json(mut patch): Json<DocumentPatch>,
) -> ApiResult<impl IntoResponse> {
    crate::require_changes!(patch);
    // Categories set through the API always come from a person.
    if patch.category.is_some() {
        patch.category_source = Some(CategorySource::User);
    }

    let document = state.store.document_update(auth.access(), id, &patch).await?;
    state.publish(EntityKind::Document, ChangeKind::Update, document.id, document.org_id);
    Ok(Json(document))
}

/// DELETE /api/v1/documents/{id} - Delete metadata and stored bytes
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/documents/{id}",
    tag = "Documents",
    params(("id" = uuid::Uuid, Path, description = "Document ID")),
    responses(
        (status = 204, description = "Document deleted"),
        (status = 404, description = "Document not found", body = ApiError),
    ),
    security(("api_key" = []), ("bearer_auth" = []))
))]
pub async fn delete_document(
    State(state): State<AppState>,
    auth: AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<StatusCode> {
    let document = state.store.document_delete(auth.access(), id).await?;
    if let Err(e) = state.objects.delete(&document.storage_path).await {
        tracing::warn!(path = %document.storage_path, error = %e, "Failed to remove document bytes");
    }
    state.publish(EntityKind::Document, ChangeKind::Delete, document.id, document.org_id);
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.storage_config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/", get(list_documents).post(upload_document))
        .route("/:id", get(get_document).patch(update_document).delete(delete_document))
        .route("/:id/url", get(document_url))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
