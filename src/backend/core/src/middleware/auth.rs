//! Authentication guard and token issuing.
//!
//! The guard looks for a credential in `Authorization: Bearer <token>` and
//! falls back to the token cookie. The token must verify (HS512 signature and
//! expiry) and its subject must still exist in the user store. On success an
//! [`AuthContext`] holding the subject id and the raw token is attached to the
//! request. Every failure is reported the same way, `401 Authorization Error`,
//! whatever the cause.
//!
//! # Example
//!
//! ```rust,ignore
//! use folio_core::middleware::auth::{AuthConfig, AuthLayer, Authenticator};
//!
//! let authenticator = Arc::new(Authenticator::new(
//!     AuthConfig::builder().jwt_secret("secret").build(),
//! )?);
//!
//! let app = Router::new()
//!     .route("/api/auth/me", get(me))
//!     .route_layer(AuthLayer::new(authenticator, users));
//! ```

use crate::error::ApiError;
use crate::store::UserRepository;
use axum::{
    async_trait,
    body::Body,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::future::BoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::debug;

/// The only message a client sees for a rejected credential.
pub const AUTHORIZATION_ERROR: &str = "Authorization Error";

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Why authentication failed. Kept for logs and metrics only.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token subject no longer exists")]
    UnknownSubject,

    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl AuthError {
    fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidToken => "invalid_token",
            Self::UnknownSubject => "unknown_subject",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        counter!("folio_auth_failures_total", "reason" => error.reason()).increment(1);
        match error {
            AuthError::Internal(detail) => ApiError::fault(detail),
            _ => ApiError::unauthorized(AUTHORIZATION_ERROR),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Claims
// ═══════════════════════════════════════════════════════════════════════════════

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Issued at (Unix seconds)
    pub iat: i64,

    /// Expiration (Unix seconds)
    pub exp: i64,
}

impl Claims {
    /// Claims for `subject` valid for `lifetime` from now.
    pub fn new(subject: impl Into<String>, lifetime: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: subject.into(),
            iat: now,
            exp: now + lifetime.as_secs() as i64,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret for signing tokens
    pub jwt_secret: String,

    /// Token lifetime, also the cookie max-age
    pub token_lifetime: Duration,

    /// Name of the cookie carrying the token
    pub cookie_name: String,

    /// Clock skew tolerance in seconds
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_lifetime: Duration::from_secs(86_400),
            cookie_name: "token".to_string(),
            leeway_secs: 0,
        }
    }
}

impl AuthConfig {
    /// Create a new builder for auth configuration.
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }
}

/// Builder for auth configuration.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = secret.into();
        self
    }

    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.token_lifetime = lifetime;
        self
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.config.cookie_name = name.into();
        self
    }

    pub fn leeway_secs(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    pub fn build(self) -> AuthConfig {
        self.config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Auth Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity bound to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub token: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authenticator
// ═══════════════════════════════════════════════════════════════════════════════

const ALGORITHM: Algorithm = Algorithm::HS512;

/// Issues and verifies credential tokens.
pub struct Authenticator {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    /// Create a new authenticator.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        if config.jwt_secret.is_empty() {
            return Err(AuthError::Internal("JWT secret must not be empty".into()));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = config.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            config,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Issue a token for `subject` with the configured lifetime.
    pub fn issue(&self, subject: &str) -> Result<String, AuthError> {
        self.generate_token(&Claims::new(subject, self.config.token_lifetime))
    }

    /// Sign arbitrary claims.
    pub fn generate_token(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify signature and expiry. All failures collapse to `InvalidToken`.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("JWT validation failed: {}", e);
                AuthError::InvalidToken
            })
    }

    /// Find the credential in the headers: bearer token first, then cookie.
    pub fn extract_token(&self, headers: &HeaderMap) -> Option<String> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| {
                let mut parts = s.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => {
                        Some(token.to_string())
                    }
                    _ => None,
                }
            });

        bearer.or_else(|| read_cookie(headers, &self.config.cookie_name))
    }

    /// Run the full guard: extract, verify, resolve the subject.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        users: &dyn UserRepository,
    ) -> Result<AuthContext, AuthError> {
        let token = self
            .extract_token(headers)
            .ok_or(AuthError::MissingCredentials)?;
        let claims = self.verify(&token)?;

        let user = users
            .find_by_id(&claims.sub)
            .await
            .map_err(|e| AuthError::Internal(format!("user lookup failed: {}", e)))?;
        if user.is_none() {
            return Err(AuthError::UnknownSubject);
        }

        Ok(AuthContext {
            user_id: claims.sub,
            token,
        })
    }

    /// `Set-Cookie` value carrying a freshly issued token.
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; Secure; SameSite=None",
            self.config.cookie_name,
            token,
            self.config.token_lifetime.as_secs()
        )
    }

    /// `Set-Cookie` value clearing the token cookie.
    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=None",
            self.config.cookie_name
        )
    }
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication layer for Tower. Apply with `route_layer` on protected routes.
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<Authenticator>,
    users: Arc<dyn UserRepository>,
}

impl AuthLayer {
    pub fn new(authenticator: Arc<Authenticator>, users: Arc<dyn UserRepository>) -> Self {
        Self {
            authenticator,
            users,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: self.authenticator.clone(),
            users: self.users.clone(),
        }
    }
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
    users: Arc<dyn UserRepository>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let users = self.users.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match authenticator
                .authenticate(request.headers(), users.as_ref())
                .await
            {
                Ok(auth_context) => {
                    request.extensions_mut().insert(auth_context);
                    inner.call(request).await
                }
                Err(e) => {
                    debug!(reason = e.reason(), "Authentication rejected");
                    Ok(e.into_response())
                }
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractor
// ═══════════════════════════════════════════════════════════════════════════════

/// Extractor for the identity bound by [`AuthLayer`].
#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| AuthError::MissingCredentials.into())
    }
}
