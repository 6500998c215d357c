#![allow(clippy::result_large_err)]
//! # Folio Core
//!
//! HTTP API for a personal portfolio: accounts, works and image uploads,
//! served through a fixed request pipeline.
//!
//! ## Architecture
//!
//! - **Logger**: one structured record per request, sent to every sink
//! - **Error Channel**: typed errors turned into a uniform JSON body by a
//!   terminal handler that also logs and raises alerts
//! - **Rate Limiter**: fixed-window request counting per client
//! - **Auth Guard**: signed bearer or cookie credentials on protected routes
//! - **Validation**: declarative schemas checked before handlers run
//! - **Store**: repository traits with in-memory and filesystem backends

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod password;
pub mod store;
pub mod validation;

pub use error::{ApiError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, AppState, Pipeline};
    pub use crate::config::Config;
    pub use crate::error::{
        AlertNotifier, ApiError, ErrorBody, ErrorHandlerLayer, NoopNotifier, Result,
        WebhookNotifier,
    };
    pub use crate::middleware::{
        AuthConfig, AuthContext, AuthError, AuthLayer, Authenticator, Claims, ConsoleSink,
        ErrorRecordStore, LogRecord, LogSink, LoggerLayer, RateLimitConfig, RateLimitLayer,
        RateLimiter, TracingSink,
    };
    pub use crate::store::{
        FsUploadStore, MemoryUploadStore, MemoryUserRepository, MemoryWorkRepository,
        UploadStore, UserRepository, WorkRepository,
    };
    pub use crate::validation::{FieldValidator, Payload, Schema, ValidateLayer};
}
