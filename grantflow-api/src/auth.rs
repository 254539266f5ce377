//! Authentication Module
//!
//! Two credential types are accepted:
//! 1. JWT bearer tokens (`Authorization: Bearer`) issued to end users. The
//!    token's subject is the user id; the organization comes from the user's
//!    profile, never from the request.
//! 2. API keys (`X-API-Key`) for operators and integrations. These must name
//!    the organization in `X-Tenant-ID` and act with admin rights inside it.

use crate::error::{ApiError, ApiResult};
use grantflow_core::{EntityId, ProfileRole};
use grantflow_storage::{Access, GrantStore};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

// ============================================================================
// CLOCK ABSTRACTION
// ============================================================================

/// Clock used for JWT time validation.
///
/// Token times are checked here rather than inside `jsonwebtoken`, so tests
/// can pin the clock.
pub trait JwtClock: Send + Sync {
    fn now_epoch_secs(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl JwtClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl JwtClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

/// HMAC signing secret for user tokens. Redacted in `Debug`.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Blank input falls back to the insecure development secret, which
    /// `validate_for_production` refuses.
    pub fn from_value(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            Self(SecretString::from(INSECURE_DEFAULT_SECRET))
        } else {
            Self(SecretString::from(value))
        }
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.expose() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret(<{} bytes>)", self.len())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Valid API keys.
    pub api_keys: HashSet<String>,

    pub jwt_secret: JwtSecret,

    /// JWT algorithm (default: HS256)
    pub jwt_algorithm: Algorithm,

    /// JWT token expiration in seconds (default: 1 hour)
    pub jwt_expiration_secs: i64,

    /// Tolerance for clock drift when checking `exp`.
    pub jwt_clock_skew_secs: i64,

    pub clock: Arc<dyn JwtClock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_keys", &format!("[{} keys]", self.api_keys.len()))
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_expiration_secs", &self.jwt_expiration_secs)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .field("clock", &"<JwtClock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: HashSet::new(),
            jwt_secret: JwtSecret::from_value(INSECURE_DEFAULT_SECRET),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: 3600,
            jwt_clock_skew_secs: 60,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `GRANTFLOW_API_KEYS`: Comma-separated list of valid API keys
    /// - `GRANTFLOW_JWT_SECRET`: JWT signing secret
    /// - `GRANTFLOW_JWT_EXPIRATION_SECS`: JWT token expiration (default: 3600)
    /// - `GRANTFLOW_JWT_CLOCK_SKEW_SECS`: JWT clock skew tolerance (default: 60)
    pub fn from_env() -> Self {
        let api_keys = std::env::var("GRANTFLOW_API_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let secret_str = std::env::var("GRANTFLOW_JWT_SECRET").unwrap_or_default();

        Self {
            api_keys,
            jwt_secret: JwtSecret::from_value(secret_str),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: std::env::var("GRANTFLOW_JWT_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
            jwt_clock_skew_secs: std::env::var("GRANTFLOW_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            clock: Arc::new(SystemClock),
        }
    }

    /// Refuse to start in production with a default or short secret. In
    /// development the same problems only log a warning.
    pub fn validate_for_production(&self, environment: &str) -> ApiResult<()> {
        let environment = environment.to_lowercase();
        let is_production = environment == "production" || environment == "prod";

        if self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "Cannot start server in production with insecure JWT secret. \
                     Set GRANTFLOW_JWT_SECRET to a secure value. GRANTFLOW_ENVIRONMENT={}",
                    environment
                )));
            }
            tracing::warn!(
                "Using insecure default JWT secret. Set GRANTFLOW_JWT_SECRET before deploying."
            );
        } else if self.jwt_secret.len() < 32 {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "JWT secret is too short for production use ({} chars). \
                     It must be at least 32 characters long.",
                    self.jwt_secret.len()
                )));
            }
            tracing::warn!(
                secret_len = self.jwt_secret.len(),
                "JWT secret is short; use at least 32 characters in production"
            );
        }

        Ok(())
    }

    pub fn add_api_key(&mut self, key: String) {
        self.api_keys.insert(key);
    }

    pub fn is_valid_api_key(&self, key: &str) -> bool {
        self.api_keys.contains(key)
    }
}

// ============================================================================
// JWT CLAIMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Claims {
    pub fn new(user_id: EntityId, email: Option<String>, expiration_secs: i64, clock: &dyn JwtClock) -> Self {
        let now = clock.now_epoch_secs();
        Self {
            sub: user_id.to_string(),
            iat: now,
            exp: now + expiration_secs,
            email,
        }
    }

    pub fn is_expired(&self, clock: &dyn JwtClock) -> bool {
        self.exp < clock.now_epoch_secs()
    }

    pub fn user_id(&self) -> ApiResult<EntityId> {
        Uuid::parse_str(&self.sub).map_err(|_| ApiError::invalid_token("Token subject is not a user id"))
    }
}

// ============================================================================
// AUTHENTICATION CONTEXT
// ============================================================================

/// Authentication method used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Jwt,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::ApiKey => "api_key",
            AuthMethod::Jwt => "jwt",
        }
    }
}

/// Verified credentials, before organization membership is resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    /// A signed-in user. Membership comes from their profile.
    User { user_id: EntityId, email: Option<String> },
    /// An API key acting inside the named organization.
    ApiKey { key_id: String, org_id: EntityId },
}

/// Authenticated caller, injected into request extensions by the auth
/// middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    /// User id, or nil for API key callers.
    pub user_id: EntityId,
    pub org_id: EntityId,
    pub role: ProfileRole,
    pub auth_method: AuthMethod,
    pub email: Option<String>,
}

impl AuthContext {
    /// Storage scope for this caller.
    pub fn access(&self) -> Access {
        Access::Tenant(self.org_id)
    }

    /// Owners and admins only.
    pub fn require_manager(&self, action: &str) -> ApiResult<()> {
        if self.role.can_manage() {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Only owners and admins may {}",
                action
            )))
        }
    }
}

// ============================================================================
// AUTHENTICATION FUNCTIONS
// ============================================================================

/// Check `exp` and `nbf` against the configured clock with leeway.
fn validate_claim_times(now: i64, exp: i64, nbf: Option<i64>, leeway_secs: i64) -> ApiResult<()> {
    if let Some(nbf) = nbf {
        if now + leeway_secs < nbf {
            return Err(ApiError::unauthorized("Token not yet valid (nbf)"));
        }
    }

    if exp < now - leeway_secs {
        return Err(ApiError::token_expired());
    }

    Ok(())
}

/// Verify a JWT signature and return its claims.
pub fn validate_jwt_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = HashSet::from(["exp".to_string()]);

    let token_data =
        decode::<Claims>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::invalid_token("Token signature is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidToken => {
                ApiError::invalid_token("Token is invalid")
            }
            _ => ApiError::invalid_token(format!("Token validation failed: {}", e)),
        })?;

    let claims = token_data.claims;
    let now = config.clock.now_epoch_secs();
    if now < 0 {
        tracing::error!(timestamp = now, "System clock returned pre-epoch time");
        return Err(ApiError::internal_error("Server time configuration error"));
    }

    validate_claim_times(now, claims.exp, None, config.jwt_clock_skew_secs)?;

    Ok(claims)
}

/// Issue a JWT for a user.
pub fn generate_jwt_token(
    config: &AuthConfig,
    user_id: EntityId,
    email: Option<String>,
) -> ApiResult<String> {
    let claims = Claims::new(user_id, email, config.jwt_expiration_secs, &*config.clock);
    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    encode(&Header::new(config.jwt_algorithm), &claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

/// Parse the `X-Tenant-ID` header.
pub fn extract_tenant_id(header_value: &str) -> ApiResult<EntityId> {
    Uuid::parse_str(header_value.trim()).map_err(|_| ApiError::invalid_format("X-Tenant-ID", "valid UUID"))
}

/// Verify request credentials. API keys take precedence over bearer tokens.
pub fn authenticate(
    config: &AuthConfig,
    api_key_header: Option<&str>,
    auth_header: Option<&str>,
    tenant_id_header: Option<&str>,
) -> ApiResult<Credential> {
    if let Some(api_key) = api_key_header {
        if !config.is_valid_api_key(api_key) {
            return Err(ApiError::unauthorized("Invalid API key"));
        }
        let org_id = tenant_id_header
            .map(extract_tenant_id)
            .transpose()?
            .ok_or_else(|| ApiError::missing_field("X-Tenant-ID"))?;
        let key_id = format!("api_key_{}", api_key.chars().take(8).collect::<String>());
        return Ok(Credential::ApiKey { key_id, org_id });
    }

    if let Some(auth_value) = auth_header {
        let token = auth_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::invalid_token("Authorization header must use Bearer scheme"))?;
        let claims = validate_jwt_token(config, token)?;
        return Ok(Credential::User {
            user_id: claims.user_id()?,
            email: claims.email,
        });
    }

    Err(ApiError::unauthorized(
        "Authentication required: provide X-API-Key or Authorization header",
    ))
}

/// Resolve the organization a credential acts in.
///
/// Users without a profile have no organization and are rejected with 403.
pub async fn resolve_membership(store: &dyn GrantStore, credential: Credential) -> ApiResult<AuthContext> {
    match credential {
        Credential::User { user_id, email } => {
            let profile = store
                .profile_get(user_id)
                .await?
                .ok_or_else(|| ApiError::forbidden("User has no organization membership"))?;
            Ok(AuthContext {
                user_id,
                org_id: profile.org_id,
                role: profile.role,
                auth_method: AuthMethod::Jwt,
                email: email.or(Some(profile.email)),
            })
        }
        Credential::ApiKey { key_id, org_id } => {
            store
                .organization_get(Access::Tenant(org_id), org_id)
                .await?
                .ok_or_else(|| ApiError::forbidden(format!("Unknown organization {}", org_id)))?;
            tracing::debug!(key_id = %key_id, org_id = %org_id, "API key authenticated");
            Ok(AuthContext {
                user_id: Uuid::nil(),
                org_id,
                role: ProfileRole::Admin,
                auth_method: AuthMethod::ApiKey,
                email: None,
            })
        }
    }
}
