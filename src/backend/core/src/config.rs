//! Configuration management.
//!
//! Sources, lowest precedence first: built-in defaults, an optional file,
//! then environment variables prefixed with `FOLIO` (e.g. `FOLIO__JWT__SECRET`).

use crate::middleware::auth::AuthConfig;
use crate::middleware::rate_limit::RateLimitConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Token configuration
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Upload configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Alert configuration
    #[serde(default)]
    pub alert: AlertConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Regex matched against the `Origin` header
    #[serde(default = "default_cors_allow_origin")]
    pub cors_allow_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allow_origin: default_cors_allow_origin(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HMAC signing secret
    #[serde(default)]
    pub secret: String,

    /// Token lifetime in seconds
    #[serde(default = "default_expires_in_sec")]
    pub expires_in_sec: u64,

    /// Cookie carrying the token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expires_in_sec: default_expires_in_sec(),
            cookie_name: default_cookie_name(),
        }
    }
}

impl JwtConfig {
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::builder()
            .jwt_secret(self.secret.clone())
            .token_lifetime(Duration::from_secs(self.expires_in_sec))
            .cookie_name(self.cookie_name.clone())
            .build()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// How often stale windows are purged
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Proxy headers trusted for the client IP, e.g. `["X-Forwarded-For"]`.
    /// Empty keys clients by the socket peer.
    #[serde(default)]
    pub trusted_proxy_headers: Vec<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            cleanup_interval: default_cleanup_interval(),
            trusted_proxy_headers: Vec::new(),
        }
    }
}

impl RateLimitSettings {
    pub fn limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig::builder()
            .window(Duration::from_millis(self.window_ms))
            .max_requests(self.max_requests)
            .trusted_proxy_headers(self.trusted_proxy_headers.clone())
            .build()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Files must be strictly smaller than this many bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Directory holding uploaded objects
    #[serde(default = "default_upload_root")]
    pub root: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            root: default_upload_root(),
        }
    }
}

/// Subscriber output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Also print colored request lines to stderr
    #[serde(default)]
    pub console: bool,

    /// Offset used for console timestamps
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Retention of error records
    #[serde(default = "default_error_ttl", with = "humantime_serde")]
    pub error_ttl: Duration,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            console: false,
            utc_offset_hours: default_utc_offset_hours(),
            error_ttl: default_error_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Push webhook; alerts are dropped when unset
    pub webhook_url: Option<String>,

    pub device_id: Option<String>,

    /// Lowest status that triggers an alert
    #[serde(default = "default_alert_min_status")]
    pub min_status: u16,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            device_id: None,
            min_status: default_alert_min_status(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_cors_allow_origin() -> String { ".*".to_string() }
fn default_expires_in_sec() -> u64 { 86_400 }
fn default_cookie_name() -> String { "token".to_string() }
fn default_window_ms() -> u64 { 60_000 }
fn default_max_requests() -> u64 { 100 }
fn default_cleanup_interval() -> Duration { Duration::from_secs(60) }
fn default_max_file_size() -> u64 { 5 * 1024 * 1024 }
fn default_upload_root() -> String { "uploads".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_utc_offset_hours() -> i32 { 9 }
fn default_error_ttl() -> Duration { Duration::from_secs(3600) }
fn default_alert_min_status() -> u16 { 500 }

/// A configuration that loaded but cannot be served.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("jwt.secret must be set")]
    MissingSecret,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("server.cors_allow_origin is not a valid regex: {0}")]
    InvalidCorsPattern(String),

    #[error("alert.min_status {0} is not an HTTP status")]
    InvalidAlertStatus(u16),
}

impl Config {
    /// Load configuration from environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::build(None)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        Self::build(Some(path))
    }

    fn build(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("FOLIO")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rate_limit.trusted_proxy_headers"),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.jwt.expires_in_sec == 0 {
            return Err(ConfigError::Zero("jwt.expires_in_sec"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::Zero("rate_limit.window_ms"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Zero("rate_limit.max_requests"));
        }
        if self.upload.max_file_size == 0 {
            return Err(ConfigError::Zero("upload.max_file_size"));
        }
        regex::Regex::new(&self.server.cors_allow_origin)
            .map_err(|e| ConfigError::InvalidCorsPattern(e.to_string()))?;
        if axum::http::StatusCode::from_u16(self.alert.min_status).is_err() {
            return Err(ConfigError::InvalidAlertStatus(self.alert.min_status));
        }
        Ok(())
    }
}
