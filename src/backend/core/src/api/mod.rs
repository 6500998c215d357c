//! HTTP API: handlers and router assembly.
//!
//! Every request passes through the same ordered stack, outermost first:
//!
//! ```text
//! Logger → Error Handler → panic catcher → CORS → Rate Limiter
//!        → [per route] Auth Guard → Validation → handler
//! ```
//!
//! The not-found fallback sits inside the stack, so unmatched requests are
//! rate limited, logged and reported like any other. `/metrics` is mounted
//! below the logger but above the rate limiter.
//!
//! # Routes
//!
//! - `GET /api` - endpoint index
//! - `/api/auth` - signup, login, logout, me
//! - `/api/works` - works CRUD keyed by title
//! - `/api/upload` - multipart image upload, replace, delete

pub mod auth;
pub mod upload;
pub mod works;

use crate::error::{handle_panic, not_found_fallback, ErrorHandlerLayer};
use crate::middleware::auth::{AuthLayer, Authenticator};
use crate::middleware::logger::LoggerLayer;
use crate::middleware::rate_limit::{RateLimitLayer, RateLimiter};
use crate::store::{UploadStore, UserRepository, WorkRepository};
use axum::{
    http::HeaderValue,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub works: Arc<dyn WorkRepository>,
    pub uploads: Arc<dyn UploadStore>,
    pub authenticator: Arc<Authenticator>,
    /// Uploaded files must be strictly smaller than this
    pub max_file_size: u64,
}

impl AppState {
    /// Guard for routes that need an authenticated user.
    pub fn auth_layer(&self) -> AuthLayer {
        AuthLayer::new(self.authenticator.clone(), self.users.clone())
    }
}

/// The cross-cutting stages wrapped around the routes.
#[derive(Clone)]
pub struct Pipeline {
    pub rate_limiter: Arc<RateLimiter>,
    pub logger: LoggerLayer,
    pub error_handler: ErrorHandlerLayer,
    /// Origins allowed by CORS; any origin when `None`
    pub cors_allow_origin: Option<Regex>,
    /// Recorder rendered at `/metrics`; the route is absent when `None`
    pub metrics: Option<PrometheusHandle>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::new(Default::default())),
            logger: LoggerLayer::default(),
            error_handler: ErrorHandlerLayer::default(),
            cors_allow_origin: None,
            metrics: None,
        }
    }
}

/// One mounted endpoint, as listed by the index.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub method: &'static str,
    pub path: &'static str,
}

impl Endpoint {
    pub const fn new(method: &'static str, path: &'static str) -> Self {
        Self { method, path }
    }
}

/// Sub-routers mounted under `/api`.
fn sections() -> [(&'static str, &'static [Endpoint]); 3] {
    [
        ("/auth", auth::ENDPOINTS),
        ("/works", works::ENDPOINTS),
        ("/upload", upload::ENDPOINTS),
    ]
}

/// `"<METHOD> /api<section><path>"` strings grouped by section.
pub fn endpoint_index() -> BTreeMap<&'static str, Vec<String>> {
    sections()
        .into_iter()
        .map(|(section, endpoints)| {
            let listed = endpoints
                .iter()
                .map(|e| {
                    let path = format!("/api{}{}", section, e.path);
                    let path = match path.strip_suffix('/') {
                        Some(trimmed) => trimmed.to_string(),
                        None => path,
                    };
                    format!("{} {}", e.method, path)
                })
                .collect();
            (section, listed)
        })
        .collect()
}

async fn index() -> Json<BTreeMap<&'static str, Vec<String>>> {
    Json(endpoint_index())
}

fn cors_layer(allow_origin: Option<Regex>) -> CorsLayer {
    let origin = match allow_origin {
        Some(pattern) => AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(|o| pattern.is_match(o))
        }),
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Build the API router with the full request pipeline.
///
/// # Example
///
/// ```rust,ignore
/// let app = build_router(state, Pipeline::default());
/// axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
/// ```
pub fn build_router(state: AppState, pipeline: Pipeline) -> Router {
    let api = Router::new()
        .route("/", get(index))
        .nest("/auth", auth::router(&state))
        .nest("/works", works::router(&state))
        .nest("/upload", upload::router(&state))
        .with_state(state);

    let mut app = Router::new()
        .nest("/api", api)
        .fallback(not_found_fallback)
        .layer(RateLimitLayer::new(pipeline.rate_limiter));

    if let Some(handle) = pipeline.metrics {
        app = app.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    app.layer(cors_layer(pipeline.cors_allow_origin))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(pipeline.error_handler)
        .layer(pipeline.logger)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_index() {
        let index = endpoint_index();
        assert_eq!(index.len(), 3);
        assert!(index["/auth"].contains(&"POST /api/auth/signup".to_string()));
        assert!(index["/works"].contains(&"GET /api/works".to_string()));
        assert!(index["/works"].contains(&"DELETE /api/works/:id".to_string()));
        assert!(index["/upload"].contains(&"PUT /api/upload/*path".to_string()));
    }
}
