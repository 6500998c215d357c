//! Pipeline stages implemented as Tower layers.
//!
//! - [`logger`]: one log record per request, fanned out to sinks
//! - [`rate_limit`]: fixed-window admission per client
//! - [`auth`]: credential verification for protected routes

pub mod auth;
pub mod logger;
pub mod rate_limit;

pub use auth::{AuthConfig, AuthContext, AuthError, AuthLayer, Authenticator, Claims};
pub use logger::{
    ConsoleSink, ErrorRecordStore, LogLevel, LogRecord, LogSink, LoggerLayer, RequestContext,
    TracingSink,
};
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimitLayer, RateLimiter};
