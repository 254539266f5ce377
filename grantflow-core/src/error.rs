//! Error types for Grantflow operations

use crate::EntityKind;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{} with id {id} not found", .entity.label())]
    NotFound { entity: EntityKind, id: Uuid },

    #[error("Insert failed for {entity}: {reason}")]
    InsertFailed { entity: EntityKind, reason: String },

    #[error("Update failed for {entity} with id {id}: {reason}")]
    UpdateFailed {
        entity: EntityKind,
        id: Uuid,
        reason: String,
    },

    #[error("{entity} {id} does not belong to organization {org_id}")]
    AccessDenied {
        entity: EntityKind,
        id: Uuid,
        org_id: Uuid,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Corrupt row in {entity}: {reason}")]
    CorruptRow { entity: EntityKind, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Grantflow errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrantflowError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl GrantflowError {
    /// Shorthand for a not-found storage error.
    pub fn not_found(entity: EntityKind, id: Uuid) -> Self {
        GrantflowError::Storage(StorageError::NotFound { entity, id })
    }

    /// Shorthand for a missing-field validation error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        GrantflowError::Validation(ValidationError::RequiredFieldMissing {
            field: field.into(),
        })
    }

    /// Shorthand for an invalid-value validation error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GrantflowError::Validation(ValidationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }
}

/// Result type alias for Grantflow operations.
pub type GrantflowResult<T> = Result<T, GrantflowError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_uses_label() {
        let err = StorageError::NotFound {
            entity: EntityKind::BudgetLineItem,
            id: Uuid::nil(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Budget line item with id"));
        assert!(msg.ends_with("not found"));
    }

    #[test]
    fn test_access_denied_names_table() {
        let err = StorageError::AccessDenied {
            entity: EntityKind::Grant,
            id: Uuid::nil(),
            org_id: Uuid::nil(),
        };
        assert!(err.to_string().starts_with("grants "));
    }

    #[test]
    fn test_master_error_wraps_storage() {
        let err: GrantflowError = StorageError::TransactionFailed {
            reason: "rolled back".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Storage error: Transaction failed: rolled back");
    }

    #[test]
    fn test_missing_field_shorthand() {
        let err = GrantflowError::missing_field("title");
        assert!(matches!(
            err,
            GrantflowError::Validation(ValidationError::RequiredFieldMissing { ref field })
                if field == "title"
        ));
    }
}
