//! Request logger: one structured record per request.
//!
//! The logger is the outermost stage of the pipeline. It times the request,
//! lets everything below run, then builds a [`LogRecord`] from the final
//! response and hands it to every configured [`LogSink`]:
//!
//! - [`TracingSink`] emits the record as a `tracing` event with structured
//!   fields (`method`, `path`, `status`, `elapsed_ms`, `error`) and the body
//!   message in the event text.
//! - [`ConsoleSink`] prints a human line with the status colored by class.
//! - [`ErrorRecordStore`] keeps error-level records per path for a bounded time.
//!
//! Severity comes from the status alone: below 400 is `debug`, 400 and above
//! is `error`.
//!
//! # Example
//!
//! ```rust,ignore
//! use folio_core::middleware::logger::{LoggerLayer, TracingSink, ErrorRecordStore};
//!
//! let store = Arc::new(ErrorRecordStore::new(Duration::from_secs(3600)));
//! let app = Router::new()
//!     .route("/api/works", get(list_works))
//!     .layer(LoggerLayer::new().with_sink(Arc::new(TracingSink)).with_sink(store));
//! ```

use crate::error::ErrorReport;
use axum::{
    async_trait,
    body::{Body, Bytes, HttpBody},
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, Request},
    response::Response,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use colored::{ColoredString, Colorize};
use dashmap::DashMap;
use futures::{
    future::BoxFuture,
    stream::{self, StreamExt},
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    io::Write,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Log Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Severity for a response status.
    pub fn for_status(status: u16) -> Self {
        if status < 400 {
            LogLevel::Debug
        } else {
            LogLevel::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Summary of one completed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub elapsed_ms: u64,
    /// The `message` field of a JSON response body.
    pub message: Option<String>,
    /// Operator detail for unrecognized faults.
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// `"<message> - <N>ms"`, or `"- <N>ms"` without a message.
    pub fn summary(&self) -> String {
        match self.message.as_deref().filter(|m| !m.is_empty()) {
            Some(message) => format!("{message} - {}ms", self.elapsed_ms),
            None => format!("- {}ms", self.elapsed_ms),
        }
    }
}

/// Color a status code by its class.
pub fn colorize_status(status: u16) -> ColoredString {
    let text = status.to_string();
    match status / 100 {
        7 => text.magenta(),
        5 => text.red(),
        4 => text.yellow(),
        3 => text.cyan(),
        2 | 1 => text.green(),
        0 => text.yellow(),
        _ => text.normal(),
    }
}

fn colorize_level(level: LogLevel) -> ColoredString {
    match level {
        LogLevel::Debug => level.as_str().normal(),
        LogLevel::Info => level.as_str().blue(),
        LogLevel::Warn => level.as_str().yellow(),
        LogLevel::Error => level.as_str().red(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sinks
// ═══════════════════════════════════════════════════════════════════════════════

/// Destination for log records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Emits records as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) {
        let summary = record.summary();
        match record.level {
            LogLevel::Error => tracing::error!(
                request_id = %record.request_id,
                method = %record.method,
                path = %record.path,
                status = record.status,
                elapsed_ms = record.elapsed_ms,
                error = record.error.as_deref().unwrap_or(""),
                "{summary}"
            ),
            LogLevel::Warn => tracing::warn!(
                request_id = %record.request_id,
                method = %record.method,
                path = %record.path,
                status = record.status,
                elapsed_ms = record.elapsed_ms,
                "{summary}"
            ),
            LogLevel::Info => tracing::info!(
                request_id = %record.request_id,
                method = %record.method,
                path = %record.path,
                status = record.status,
                elapsed_ms = record.elapsed_ms,
                "{summary}"
            ),
            LogLevel::Debug => tracing::debug!(
                request_id = %record.request_id,
                method = %record.method,
                path = %record.path,
                status = record.status,
                elapsed_ms = record.elapsed_ms,
                "{summary}"
            ),
        }
    }
}

/// Prints `<time> [LEVEL] <METHOD> <path> <status> <summary>` to stderr.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    offset: FixedOffset,
}

impl ConsoleSink {
    /// Render timestamps at a fixed UTC offset in hours.
    pub fn new(utc_offset_hours: i32) -> Self {
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn format(&self, record: &LogRecord) -> String {
        let local = record.timestamp.with_timezone(&self.offset);
        let hours = self.offset.local_minus_utc() / 3600;
        format!(
            "{} GMT{:+} [{}] {} {} {} {}",
            local.format("%-m/%-d/%Y, %H:%M:%S"),
            hours,
            colorize_level(record.level),
            record.method,
            record.path,
            colorize_status(record.status),
            record.summary(),
        )
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new(9)
    }
}

impl LogSink for ConsoleSink {
    fn emit(&self, record: &LogRecord) {
        let line = self.format(record);
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Record Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredRecord {
    record: LogRecord,
    stored_at: Instant,
}

impl StoredRecord {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() >= ttl
    }
}

/// Error-level records keyed by request path, each kept for `ttl`.
///
/// Expired records are dropped lazily on read and by [`purge_expired`].
/// At most `max_per_path` records are kept per path, oldest dropped first.
///
/// [`purge_expired`]: ErrorRecordStore::purge_expired
#[derive(Debug)]
pub struct ErrorRecordStore {
    records: DashMap<String, Vec<StoredRecord>>,
    ttl: Duration,
    max_per_path: usize,
}

impl ErrorRecordStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, 100)
    }

    pub fn with_capacity(ttl: Duration, max_per_path: usize) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
            max_per_path: max_per_path.max(1),
        }
    }

    /// Store a record if it is error-level.
    pub fn insert(&self, record: &LogRecord) {
        if record.level < LogLevel::Error {
            return;
        }

        let mut entries = self.records.entry(record.path.clone()).or_default();
        entries.retain(|e| !e.is_expired(self.ttl));
        entries.push(StoredRecord {
            record: record.clone(),
            stored_at: Instant::now(),
        });
        let overflow = entries.len().saturating_sub(self.max_per_path);
        if overflow > 0 {
            entries.drain(..overflow);
        }
    }

    /// Live records for a path, oldest first.
    pub fn get(&self, path: &str) -> Vec<LogRecord> {
        let Some(mut entries) = self.records.get_mut(path) else {
            return Vec::new();
        };
        entries.retain(|e| !e.is_expired(self.ttl));
        entries.iter().map(|e| e.record.clone()).collect()
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        self.records.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| !e.is_expired(self.ttl));
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    /// Number of live records across all paths.
    pub fn len(&self) -> usize {
        self.records
            .iter()
            .map(|entry| entry.value().iter().filter(|e| !e.is_expired(self.ttl)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for ErrorRecordStore {
    fn emit(&self, record: &LogRecord) {
        self.insert(record);
    }
}

/// Periodically purge expired error records.
pub fn start_purge_task(store: Arc<ErrorRecordStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = store.purge_expired();
            if removed > 0 {
                tracing::debug!(removed = removed, "Purged expired error records");
            }
        }
    });
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-request data the logger makes available to later stages.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext {
                request_id: Uuid::new_v4().to_string(),
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
                started_at: Utc::now(),
            }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Logger Layer
// ═══════════════════════════════════════════════════════════════════════════════

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Largest JSON body the logger will buffer to read its message.
const DEFAULT_MAX_INSPECT_BYTES: usize = 64 * 1024;

/// Layer that logs every request once.
#[derive(Clone)]
pub struct LoggerLayer {
    sinks: Arc<Vec<Arc<dyn LogSink>>>,
    max_inspect_bytes: usize,
}

impl LoggerLayer {
    pub fn new() -> Self {
        Self {
            sinks: Arc::new(Vec::new()),
            max_inspect_bytes: DEFAULT_MAX_INSPECT_BYTES,
        }
    }

    /// Add a sink.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        Arc::make_mut(&mut self.sinks).push(sink);
        self
    }

    pub fn max_inspect_bytes(mut self, bytes: usize) -> Self {
        self.max_inspect_bytes = bytes;
        self
    }
}

impl Default for LoggerLayer {
    fn default() -> Self {
        Self::new().with_sink(Arc::new(TracingSink))
    }
}

impl<S> Layer<S> for LoggerLayer {
    type Service = LoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggerService {
            inner,
            sinks: self.sinks.clone(),
            max_inspect_bytes: self.max_inspect_bytes,
        }
    }
}

/// Service produced by [`LoggerLayer`].
#[derive(Clone)]
pub struct LoggerService<S> {
    inner: S,
    sinks: Arc<Vec<Arc<dyn LogSink>>>,
    max_inspect_bytes: usize,
}

impl<S> Service<Request<Body>> for LoggerService<S>
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
        let mut inner = self.inner.clone();
        let sinks = self.sinks.clone();
        let max_inspect_bytes = self.max_inspect_bytes;

        Box::pin(async move {
            let start = Instant::now();
            let ctx = RequestContext {
                request_id: request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                method: request.method().to_string(),
                path: request.uri().path().to_string(),
                started_at: Utc::now(),
            };
            request.extensions_mut().insert(ctx.clone());

            let span = info_span!(
                "http_request",
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                status = tracing::field::Empty,
            );

            let response = inner.call(request).instrument(span.clone()).await?;
            let elapsed = start.elapsed();
            let status = response.status().as_u16();
            span.record("status", status);

            let error = response
                .extensions()
                .get::<ErrorReport>()
                .and_then(|r| r.detail.clone());
            let (mut response, message) = read_message(response, max_inspect_bytes).await;

            let record = LogRecord {
                level: LogLevel::for_status(status),
                request_id: ctx.request_id.clone(),
                method: ctx.method.clone(),
                path: ctx.path.clone(),
                status,
                elapsed_ms: elapsed.as_millis() as u64,
                message,
                error,
                timestamp: ctx.started_at,
            };
            span.in_scope(|| {
                for sink in sinks.iter() {
                    sink.emit(&record);
                }
            });
            record_metrics(&record, elapsed);

            if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            Ok(response)
        })
    }
}

/// Read `message` from a JSON body, leaving the response intact.
///
/// Chunks already read are always handed back to the client: a body that
/// outgrows `limit` or fails mid-stream is replayed as received, followed by
/// whatever it had left.
async fn read_message(response: Response, limit: usize) -> (Response, Option<String>) {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    let too_big = response.body().size_hint().lower() as usize > limit;
    if !is_json || too_big {
        return (response, None);
    }

    let (parts, body) = response.into_parts();
    let mut stream = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0;

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                size += chunk.len();
                chunks.push(chunk);
                if size > limit {
                    let replay = stream::iter(chunks.into_iter().map(Ok)).chain(stream);
                    return (Response::from_parts(parts, Body::from_stream(replay)), None);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Response body failed while buffering for logging");
                let replay = stream::iter(chunks.into_iter().map(Ok).chain(std::iter::once(Err(e))));
                return (Response::from_parts(parts, Body::from_stream(replay)), None);
            }
        }
    }

    let bytes = Bytes::from(chunks.concat());
    let message = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));

    (Response::from_parts(parts, Body::from(bytes)), message)
}

fn record_metrics(record: &LogRecord, elapsed: Duration) {
    let status = record.status.to_string();

    counter!(
        "folio_http_requests_total",
        "method" => record.method.clone(),
        "status" => status.clone()
    )
    .increment(1);

    histogram!(
        "folio_http_request_duration_seconds",
        "method" => record.method.clone(),
        "status" => status
    )
    .record(elapsed.as_secs_f64());
}
