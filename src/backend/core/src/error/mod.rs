//! Error channel for the request pipeline.
//!
//! Every stage of the pipeline and every handler reports failure by returning
//! an [`ApiError`]. The error is a tagged value decided where it is raised:
//!
//! - [`ApiError::Http`] is a recognized error. Its status and message are sent
//!   to the client as `{"message": ...}`.
//! - [`ApiError::Fault`] is an unrecognized fault (a store failure, a panic, a
//!   bug). The client only ever sees a generic `500 Internal Server Error`; the
//!   detail is kept for operators.
//!
//! Converting an error into a response does not log it. The response carries an
//! [`ErrorReport`] extension that the terminal [`ErrorHandlerLayer`] consumes,
//! so each error is logged and alerted exactly once, at the pipeline boundary.
//!
//! # Usage
//!
//! ```rust,ignore
//! use folio_core::error::{ApiError, Result};
//!
//! async fn find(title: String) -> Result<Json<Work>> {
//!     let work = repo.get_by_title(&title).await?
//!         .ok_or_else(|| ApiError::not_found(format!("Work title({title}) not found")))?;
//!     Ok(Json(work))
//! }
//! ```

mod handler;
mod notify;

pub use handler::{handle_panic, not_found_fallback, ErrorHandlerLayer, ErrorHandlerService};
pub use notify::{Alert, AlertNotifier, NoopNotifier, NotifyError, WebhookNotifier};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for pipeline stages and handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Message used when a recognized error is raised with an empty message.
pub const FALLBACK_MESSAGE: &str = "Something is wrong";

/// Client-facing message for every unrecognized fault.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

// ═══════════════════════════════════════════════════════════════════════════════
// Routing Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Where an error was raised. Filled in by the raising site when it knows,
/// completed by the terminal handler otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl RouteContext {
    /// Fill in method and path if the raising site did not.
    pub fn complete(&mut self, method: &str, path: &str) {
        if self.method.is_none() {
            self.method = Some(method.to_string());
        }
        if self.path.is_none() {
            self.path = Some(path.to_string());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The single error type flowing through the pipeline.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A recognized error with a client-visible status and message.
    #[error("{status}: {message}")]
    Http {
        status: StatusCode,
        message: Cow<'static, str>,
        context: RouteContext,
    },

    /// An unrecognized fault. Only operators see `detail`.
    #[error("unrecognized fault: {detail}")]
    Fault {
        detail: String,
        context: RouteContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ApiError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a recognized error. An empty message becomes [`FALLBACK_MESSAGE`].
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            Cow::Borrowed(FALLBACK_MESSAGE)
        } else {
            message
        };
        Self::Http {
            status,
            message,
            context: RouteContext::default(),
        }
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401 Unauthorized.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 403 Forbidden.
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 409 Conflict.
    pub fn conflict(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// 429 Too Many Requests.
    pub fn too_many_requests(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    /// A recognized 500, for failures whose message is safe to show.
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// An unrecognized fault described for operators.
    pub fn fault(detail: impl Into<String>) -> Self {
        Self::Fault {
            detail: detail.into(),
            context: RouteContext::default(),
            source: None,
        }
    }

    /// An unrecognized fault wrapping its cause.
    pub fn from_source<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Fault {
            detail: source.to_string(),
            context: RouteContext::default(),
            source: Some(Box::new(source)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach the request method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.context_mut().method = Some(method.into());
        self
    }

    /// Attach the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.context_mut().path = Some(path.into());
        self
    }

    /// Attach the key of the resource involved.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.context_mut().resource = Some(resource.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => *status,
            Self::Fault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message the client receives.
    pub fn client_message(&self) -> &str {
        match self {
            Self::Http { message, .. } => message.as_ref(),
            Self::Fault { .. } => INTERNAL_ERROR_MESSAGE,
        }
    }

    /// Operator-only detail, present for faults.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Http { .. } => None,
            Self::Fault { detail, .. } => Some(detail.as_str()),
        }
    }

    pub fn context(&self) -> &RouteContext {
        match self {
            Self::Http { context, .. } | Self::Fault { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut RouteContext {
        match self {
            Self::Http { context, .. } | Self::Fault { context, .. } => context,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Self::Http { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_recognized() {
            ErrorKind::Recognized
        } else {
            ErrorKind::Fault
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Which side of the recognized/unrecognized boundary an error fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Recognized,
    Fault,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recognized => "recognized",
            Self::Fault => "fault",
        }
    }
}

/// Operator view of an error, carried on the response for the terminal handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub kind: ErrorKind,
    /// What the client was told.
    pub message: String,
    /// What actually happened, for faults.
    pub detail: Option<String>,
    pub context: RouteContext,
}

impl From<&ApiError> for ErrorReport {
    fn from(error: &ApiError) -> Self {
        let detail = match error {
            ApiError::Fault { detail, source, .. } => Some(match source {
                Some(source) if source.to_string() != *detail => {
                    format!("{detail}: {source}")
                }
                _ => detail.clone(),
            }),
            ApiError::Http { .. } => None,
        };
        Self {
            status: error.status(),
            kind: error.kind(),
            message: error.client_message().to_string(),
            detail,
            context: error.context().clone(),
        }
    }
}

impl ErrorReport {
    /// The text operators should see: detail for faults, message otherwise.
    pub fn operator_message(&self) -> &str {
        self.detail.as_deref().unwrap_or(&self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = ErrorReport::from(&self);
        let body = ErrorBody {
            message: report.message.clone(),
        };

        let mut response = (report.status, Json(body)).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        Self::from_source(error)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> Self {
        Self::from_source(error)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::from_source(error)
    }
}
