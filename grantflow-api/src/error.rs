//! API Error Types
//!
//! Every failure leaving a handler is an [`ApiError`]: a stable
//! machine-readable [`ErrorCode`], a message, and optional details, rendered
//! as JSON with the status the code maps to. Engine callbacks use their own
//! `{error}` body (see `callback`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use grantflow_core::{GrantflowError, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for API responses, serialized as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 401 / 403
    Unauthorized,
    InvalidToken,
    TokenExpired,
    Forbidden,

    // 400 / 413
    ValidationFailed,
    InvalidInput,
    MissingField,
    InvalidFormat,
    PayloadTooLarge,

    // 404 / 409 / 410
    EntityNotFound,
    EntityAlreadyExists,
    /// A signed download link past its expiry.
    LinkExpired,

    // 429
    TooManyRequests,

    // 5xx
    InternalError,
    DatabaseError,
    StorageError,
    ServiceUnavailable,
    ConnectionPoolExhausted,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        use ErrorCode::*;
        match self {
            Unauthorized | InvalidToken | TokenExpired => StatusCode::UNAUTHORIZED,
            Forbidden => StatusCode::FORBIDDEN,
            ValidationFailed | InvalidInput | MissingField | InvalidFormat => StatusCode::BAD_REQUEST,
            PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            EntityNotFound => StatusCode::NOT_FOUND,
            EntityAlreadyExists => StatusCode::CONFLICT,
            LinkExpired => StatusCode::GONE,
            TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            InternalError | DatabaseError | StorageError => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceUnavailable | ConnectionPoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// JSON error body returned by every `/api/v1` route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn token_expired() -> Self {
        Self::new(ErrorCode::TokenExpired, "Token has expired")
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("Required field '{}' is missing", field))
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn payload_too_large(limit_bytes: u64) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("Upload exceeds the {} byte limit", limit_bytes),
        )
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::EntityNotFound, format!("{} with id {} not found", entity_type, id))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn link_expired() -> Self {
        Self::new(ErrorCode::LinkExpired, "Download link has expired")
    }

    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self::new(
            ErrorCode::TooManyRequests,
            format!("Rate limit exceeded, retry after {} seconds", retry_after_secs),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

/// Domain errors keep their message; only store internals are hidden.
impl From<GrantflowError> for ApiError {
    fn from(err: GrantflowError) -> Self {
        match &err {
            GrantflowError::Storage(StorageError::NotFound { .. }) => {
                ApiError::not_found(err_message(&err))
            }
            GrantflowError::Storage(StorageError::AccessDenied { .. }) => {
                ApiError::forbidden(err_message(&err))
            }
            GrantflowError::Storage(StorageError::InsertFailed { reason, .. })
                if reason.starts_with("duplicate key") =>
            {
                ApiError::new(ErrorCode::EntityAlreadyExists, err_message(&err))
            }
            GrantflowError::Storage(StorageError::ConnectionFailed { .. }) => {
                tracing::error!(error = %err, "Store connection failed");
                ApiError::new(ErrorCode::ServiceUnavailable, "Database unavailable")
            }
            GrantflowError::Storage(_) => {
                tracing::error!(error = %err, "Store operation failed");
                ApiError::database_error(err_message(&err))
            }
            GrantflowError::Validation(ValidationError::RequiredFieldMissing { field }) => {
                ApiError::missing_field(field)
            }
            GrantflowError::Validation(_) => ApiError::validation_failed(err_message(&err)),
            GrantflowError::Config(_) => ApiError::internal_error(err_message(&err)),
        }
    }
}

/// Innermost message, without the "Storage error: " style prefixes.
fn err_message(err: &GrantflowError) -> String {
    match err {
        GrantflowError::Storage(inner) => inner.to_string(),
        GrantflowError::Validation(inner) => inner.to_string(),
        GrantflowError::Config(inner) => inner.to_string(),
    }
}

impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!(error = ?err, "Database error");
        ApiError::database_error("Database operation failed")
    }
}

impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!(error = ?err, "Connection pool error");
        match err {
            deadpool_postgres::PoolError::Timeout(_) => {
                ApiError::new(ErrorCode::ConnectionPoolExhausted, "No database connection available")
            }
            deadpool_postgres::PoolError::Closed => {
                ApiError::new(ErrorCode::ServiceUnavailable, "Database connection pool is closed")
            }
            _ => ApiError::database_error("Failed to acquire database connection"),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_format("id", &format!("valid UUID: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use grantflow_core::EntityKind;
    use uuid::Uuid;

    #[test]
    fn test_signed_link_and_upload_codes() {
        assert_eq!(ApiError::link_expired().status_code(), StatusCode::GONE);
        assert_eq!(ApiError::payload_too_large(10).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ApiError::too_many_requests(3).status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err: ApiError = GrantflowError::not_found(EntityKind::Budget, Uuid::nil()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.message.starts_with("Budget with id"));
    }

    #[test]
    fn test_access_denied_maps_to_403() {
        let err: ApiError = GrantflowError::Storage(StorageError::AccessDenied {
            entity: EntityKind::Grant,
            id: Uuid::nil(),
            org_id: Uuid::nil(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_validation_maps_to_400() {
        let err: ApiError = GrantflowError::invalid_value("section_ids", "duplicate").into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.message.contains("section_ids"));
    }

    #[test]
    fn test_duplicate_insert_maps_to_409() {
        let err: ApiError = GrantflowError::Storage(StorageError::InsertFailed {
            entity: EntityKind::Grant,
            reason: "duplicate key abc".into(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_body_shape() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(ApiError::missing_field("entity_id"))?;
        assert_eq!(json["code"], "MISSING_FIELD");
        assert_eq!(json["message"], "Required field 'entity_id' is missing");
        assert!(json.get("details").is_none());
        Ok(())
    }
}
