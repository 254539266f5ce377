//! Document Object Storage
//!
//! Uploaded bytes go through [`ObjectStore`]; the shipped backend is a
//! directory on local disk. Downloads are served through short-lived signed
//! URLs of the form `/files/{path}?expires=<unix>&signature=<hex>`, where the
//! signature is HMAC-SHA256 over `"{path}:{expires}"`.

use crate::config::StorageConfig;
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use grantflow_core::EntityId;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object storage I/O failed: {0}")]
    Io(String),
}

impl From<ObjectStoreError> for ApiError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::InvalidPath(path) => ApiError::invalid_format("path", &format!("relative object path, got {path}")),
            ObjectStoreError::NotFound(path) => ApiError::not_found(format!("File {} not found", path)),
            ObjectStoreError::Io(message) => {
                tracing::error!(error = %message, "Object storage failure");
                ApiError::storage_error("Object storage operation failed")
            }
        }
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Byte storage for uploaded documents, addressed by relative path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), ObjectStoreError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Removing a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<(), ObjectStoreError>;
}

/// Bucket rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path to a file below the root. Only plain relative
    /// segments are accepted.
    fn resolve(&self, path: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = Path::new(path);
        let plain = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(ObjectStoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &str, err: std::io::Error) -> ObjectStoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ObjectStoreError::NotFound(path.to_string())
    } else {
        ObjectStoreError::Io(format!("{path}: {err}"))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(path, e))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target).await.map_err(|e| io_error(path, e))
    }

    async fn delete(&self, path: &str) -> Result<(), ObjectStoreError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path, e)),
        }
    }
}

// ============================================================================
// UPLOADS
// ============================================================================

/// Check an upload against the configured size limit and type allow list.
pub fn validate_upload(config: &StorageConfig, content_type: &str, size: usize) -> ApiResult<()> {
    if size == 0 {
        return Err(ApiError::validation_failed("Uploaded file is empty"));
    }
    if size as u64 > config.max_upload_bytes {
        return Err(ApiError::payload_too_large(config.max_upload_bytes));
    }
    if !config.is_content_type_allowed(content_type) {
        return Err(ApiError::validation_failed(format!(
            "Content type '{}' is not allowed",
            content_type
        )));
    }
    Ok(())
}

/// Keep file names URL- and path-safe.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `{org_id}/{document_id}/{file_name}`
pub fn document_path(org_id: EntityId, document_id: EntityId, file_name: &str) -> String {
    format!("{}/{}/{}", org_id, document_id, sanitize_file_name(file_name))
}

// ============================================================================
// SIGNED URLS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SignedUrl {
    pub url: String,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignatureQuery {
    pub expires: i64,
    pub signature: String,
}

/// Issues and checks signed download URLs.
#[derive(Clone)]
pub struct UrlSigner {
    key: SecretString,
    ttl_secs: i64,
    base_url: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("key", &"[REDACTED]")
            .field("ttl_secs", &self.ttl_secs)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl UrlSigner {
    pub fn new(config: &StorageConfig, base_url: impl Into<String>) -> Self {
        Self {
            key: config.signing_key.clone(),
            ttl_secs: config.signed_url_ttl.as_secs() as i64,
            base_url: base_url.into(),
        }
    }

    fn mac(&self, path: &str, expires: i64) -> ApiResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|e| ApiError::internal_error(format!("Invalid signing key: {}", e)))?;
        mac.update(format!("{}:{}", path, expires).as_bytes());
        Ok(mac)
    }

    /// Hex signature for `path` valid until `expires`.
    pub fn sign(&self, path: &str, expires: i64) -> ApiResult<String> {
        Ok(hex::encode(self.mac(path, expires)?.finalize().into_bytes()))
    }

    pub fn signed_url(&self, path: &str, now: i64) -> ApiResult<SignedUrl> {
        let expires_at = now + self.ttl_secs;
        let signature = self.sign(path, expires_at)?;
        Ok(SignedUrl {
            url: format!(
                "{}/files/{}?expires={}&signature={}",
                self.base_url, path, expires_at, signature
            ),
            expires_at,
        })
    }

    /// 401 for a wrong signature, 410 for an expired one. The signature is
    /// checked first so a tampered expiry never reads as merely expired.
    pub fn verify(&self, path: &str, query: &SignatureQuery, now: i64) -> ApiResult<()> {
        let provided = hex::decode(&query.signature)
            .map_err(|_| ApiError::unauthorized("Invalid download signature"))?;
        self.mac(path, query.expires)?
            .verify_slice(&provided)
            .map_err(|_| ApiError::unauthorized("Invalid download signature"))?;
        if now > query.expires {
            return Err(ApiError::link_expired());
        }
        Ok(())
    }
}
