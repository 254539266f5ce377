//! API Configuration Module
//!
//! Configuration for CORS, rate limiting, the automation engine, the
//! callback receiver and object storage. Everything is loaded from
//! environment variables with development defaults.

use secrecy::SecretString;
use std::time::Duration;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS, rate limiting, and the public address.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Rate Limiting Configuration
    // ========================================================================
    pub rate_limit_enabled: bool,

    /// Requests per minute per IP for unauthenticated traffic.
    pub rate_limit_unauthenticated: u32,

    /// Requests per minute per organization.
    pub rate_limit_authenticated: u32,

    pub rate_limit_burst: u32,

    pub rate_limit_window: Duration,

    // ========================================================================
    // Addressing
    // ========================================================================
    /// Address the server binds to.
    pub bind_addr: String,

    /// Externally reachable base URL, used for the engine callback URL and
    /// signed download links.
    pub public_base_url: String,

    /// Realtime events buffered per subscriber before it starts losing them.
    /// Always at least 1.
    pub ws_capacity: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,

            rate_limit_enabled: true,
            rate_limit_unauthenticated: 100,
            rate_limit_authenticated: 1000,
            rate_limit_burst: 10,
            rate_limit_window: Duration::from_secs(60),

            bind_addr: "0.0.0.0:3000".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
            ws_capacity: 1000,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GRANTFLOW_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `GRANTFLOW_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `GRANTFLOW_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `GRANTFLOW_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `GRANTFLOW_RATE_LIMIT_UNAUTHENTICATED`: Requests per minute per IP (default: 100)
    /// - `GRANTFLOW_RATE_LIMIT_AUTHENTICATED`: Requests per minute per organization (default: 1000)
    /// - `GRANTFLOW_RATE_LIMIT_BURST`: Burst capacity (default: 10)
    /// - `GRANTFLOW_BIND_ADDR`: Listen address (default: 0.0.0.0:3000)
    /// - `GRANTFLOW_PUBLIC_URL`: External base URL (default: http://localhost:3000)
    /// - `GRANTFLOW_WS_CAPACITY`: Realtime buffer per subscriber (default: 1000, zero ignored)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("GRANTFLOW_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("GRANTFLOW_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let rate_limit_enabled = std::env::var("GRANTFLOW_RATE_LIMIT_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs: env_parse("GRANTFLOW_CORS_MAX_AGE_SECS")
                .unwrap_or(defaults.cors_max_age_secs),
            rate_limit_enabled,
            rate_limit_unauthenticated: env_parse("GRANTFLOW_RATE_LIMIT_UNAUTHENTICATED")
                .unwrap_or(defaults.rate_limit_unauthenticated),
            rate_limit_authenticated: env_parse("GRANTFLOW_RATE_LIMIT_AUTHENTICATED")
                .unwrap_or(defaults.rate_limit_authenticated),
            rate_limit_burst: env_parse("GRANTFLOW_RATE_LIMIT_BURST")
                .unwrap_or(defaults.rate_limit_burst),
            rate_limit_window: defaults.rate_limit_window,
            bind_addr: env_string("GRANTFLOW_BIND_ADDR").unwrap_or(defaults.bind_addr),
            public_base_url: env_string("GRANTFLOW_PUBLIC_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            ws_capacity: env_parse::<usize>("GRANTFLOW_WS_CAPACITY")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.ws_capacity),
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.org
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain
                        .strip_suffix(pattern)
                        .is_some_and(|prefix| prefix.ends_with('.'));
                }
            }
            false
        })
    }

    /// URL the automation engine posts results back to.
    pub fn callback_url(&self) -> String {
        format!("{}/api/webhook", self.public_base_url)
    }
}

// ============================================================================
// AUTOMATION ENGINE
// ============================================================================

/// Outbound connection to the workflow-automation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the engine. `None` disables notification.
    pub base_url: Option<String>,

    /// Sent as `X-Webhook-Secret` on every notification.
    pub secret: Option<SecretString>,

    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            secret: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Environment variables:
    /// - `GRANTFLOW_ENGINE_BASE_URL`
    /// - `GRANTFLOW_ENGINE_SECRET`
    /// - `GRANTFLOW_ENGINE_TIMEOUT_SECS` (default: 10)
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("GRANTFLOW_ENGINE_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string()),
            secret: env_string("GRANTFLOW_ENGINE_SECRET").map(SecretString::from),
            timeout: Duration::from_secs(env_parse("GRANTFLOW_ENGINE_TIMEOUT_SECS").unwrap_or(10)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

// ============================================================================
// CALLBACK RECEIVER
// ============================================================================

/// Shared secret expected on `POST /api/webhook`.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    /// When `None` the receiver accepts unauthenticated callbacks.
    pub secret: Option<SecretString>,
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        Self {
            secret: env_string("GRANTFLOW_WEBHOOK_SECRET").map(SecretString::from),
        }
    }
}

// ============================================================================
// OBJECT STORAGE
// ============================================================================

/// Content types accepted by the document upload endpoint.
pub const DEFAULT_ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
    "text/csv",
    "image/png",
    "image/jpeg",
];

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the document bucket.
    pub root: String,

    /// HMAC key for signed download URLs.
    pub signing_key: SecretString,

    pub signed_url_ttl: Duration,

    pub max_upload_bytes: u64,

    pub allowed_content_types: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./data/documents".to_string(),
            signing_key: SecretString::from("dev-signing-key-change-me"),
            signed_url_ttl: Duration::from_secs(3600),
            max_upload_bytes: 25 * 1024 * 1024,
            allowed_content_types: DEFAULT_ALLOWED_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl StorageConfig {
    /// Environment variables:
    /// - `GRANTFLOW_STORAGE_ROOT` (default: ./data/documents)
    /// - `GRANTFLOW_STORAGE_SIGNING_KEY`
    /// - `GRANTFLOW_SIGNED_URL_TTL_SECS` (default: 3600)
    /// - `GRANTFLOW_MAX_UPLOAD_BYTES` (default: 25 MiB)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            root: env_string("GRANTFLOW_STORAGE_ROOT").unwrap_or(defaults.root),
            signing_key: env_string("GRANTFLOW_STORAGE_SIGNING_KEY")
                .map(SecretString::from)
                .unwrap_or(defaults.signing_key),
            signed_url_ttl: env_parse("GRANTFLOW_SIGNED_URL_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.signed_url_ttl),
            max_upload_bytes: env_parse("GRANTFLOW_MAX_UPLOAD_BYTES")
                .unwrap_or(defaults.max_upload_bytes),
            allowed_content_types: defaults.allowed_content_types,
        }
    }

    pub fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.allowed_content_types.iter().any(|allowed| *allowed == essence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.cors_origins.is_empty());
        assert!(!config.cors_allow_credentials);
        assert_eq!(config.cors_max_age_secs, 86400);
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_unauthenticated, 100);
        assert_eq!(config.rate_limit_authenticated, 1000);
        assert_eq!(config.rate_limit_burst, 10);
    }

    #[test]
    fn test_is_production() {
        let mut config = ApiConfig::default();
        assert!(!config.is_production());

        config.cors_origins = vec!["https://grantflow.app".to_string()];
        assert!(config.is_production());
    }

    #[test]
    fn test_origin_allowed_dev_mode() {
        let config = ApiConfig::default();
        assert!(config.is_origin_allowed("https://anything.com"));
        assert!(config.is_origin_allowed("http://localhost:3000"));
    }

    #[test]
    fn test_origin_allowed_production() {
        let config = ApiConfig {
            cors_origins: vec![
                "https://grantflow.app".to_string(),
                "https://app.grantflow.app".to_string(),
            ],
            ..Default::default()
        };

        assert!(config.is_origin_allowed("https://grantflow.app"));
        assert!(config.is_origin_allowed("https://app.grantflow.app"));
        assert!(!config.is_origin_allowed("https://evil.com"));
        assert!(!config.is_origin_allowed("https://notgrantflow.app"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let config = ApiConfig {
            cors_origins: vec!["*.grantflow.app".to_string()],
            ..Default::default()
        };

        assert!(config.is_origin_allowed("https://app.grantflow.app"));
        assert!(config.is_origin_allowed("https://staging.grantflow.app"));
        assert!(!config.is_origin_allowed("https://evilgrantflow.app"));
        assert!(!config.is_origin_allowed("https://evil.com"));
    }

    #[test]
    fn test_zero_ws_capacity_falls_back_to_default() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvVarGuard::set("GRANTFLOW_WS_CAPACITY", Some("0"));
        assert_eq!(ApiConfig::from_env().ws_capacity, 1000);

        let _guard = EnvVarGuard::set("GRANTFLOW_WS_CAPACITY", Some("64"));
        assert_eq!(ApiConfig::from_env().ws_capacity, 64);
    }

    #[test]
    fn test_callback_url_from_public_base() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvVarGuard::set("GRANTFLOW_PUBLIC_URL", Some("https://api.grantflow.app/"));
        let config = ApiConfig::from_env();
        assert_eq!(config.callback_url(), "https://api.grantflow.app/api/webhook");
    }

    #[test]
    fn test_engine_unconfigured_without_base_url() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvVarGuard::set("GRANTFLOW_ENGINE_BASE_URL", None);
        let config = EngineConfig::from_env();
        assert!(!config.is_configured());
    }

    #[test]
    fn test_engine_base_url_trims_trailing_slash() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvVarGuard::set("GRANTFLOW_ENGINE_BASE_URL", Some("http://engine:5678/"));
        let _timeout = EnvVarGuard::set("GRANTFLOW_ENGINE_TIMEOUT_SECS", Some("3"));
        let config = EngineConfig::from_env();
        assert_eq!(config.base_url.as_deref(), Some("http://engine:5678"));
        assert_eq!(config.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_blank_webhook_secret_is_unset() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvVarGuard::set("GRANTFLOW_WEBHOOK_SECRET", Some("   "));
        assert!(WebhookConfig::from_env().secret.is_none());
    }

    #[test]
    fn test_storage_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.signed_url_ttl, Duration::from_secs(3600));
        assert!(config.is_content_type_allowed("application/pdf"));
        assert!(config.is_content_type_allowed("text/plain; charset=utf-8"));
        assert!(!config.is_content_type_allowed("application/x-msdownload"));
    }
}
