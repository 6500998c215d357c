//! Shared helpers for driving the assembled router.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use folio_core::api::{build_router, AppState, Pipeline};
use folio_core::middleware::{AuthConfig, Authenticator, LogRecord, LogSink, LoggerLayer};
use folio_core::store::{MemoryUploadStore, MemoryUserRepository, MemoryWorkRepository};
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret";

/// Sink that keeps every record it receives.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CollectingSink {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl LogSink for CollectingSink {
    fn emit(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub sink: Arc<CollectingSink>,
}

pub fn state() -> AppState {
    AppState {
        users: Arc::new(MemoryUserRepository::new()),
        works: Arc::new(MemoryWorkRepository::new()),
        uploads: Arc::new(MemoryUploadStore::new()),
        authenticator: Arc::new(
            Authenticator::new(AuthConfig::builder().jwt_secret(SECRET).build()).unwrap(),
        ),
        max_file_size: 5 * 1024 * 1024,
    }
}

/// Router with default pipeline stages plus a collecting log sink.
pub fn app() -> TestApp {
    app_with(Pipeline::default())
}

pub fn app_with(pipeline: Pipeline) -> TestApp {
    app_with_state(state(), pipeline)
}

pub fn app_with_state(state: AppState, mut pipeline: Pipeline) -> TestApp {
    let sink = Arc::new(CollectingSink::default());
    pipeline.logger = LoggerLayer::new().with_sink(sink.clone());
    TestApp {
        router: build_router(state.clone(), pipeline),
        state,
        sink,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

/// Attach the socket peer the way `into_make_service_with_connect_info` does.
pub fn from_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn cookie(mut request: Request<Body>, token: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert(header::COOKIE, format!("token={token}").parse().unwrap());
    request
}

/// Multipart body with an optional `path` text part and one `file` part.
pub fn multipart(
    method: &str,
    uri: &str,
    path: Option<&str>,
    file_name: &str,
    content_type: &str,
    data: &[u8],
) -> Request<Body> {
    const BOUNDARY: &str = "TESTBOUNDARY";
    let mut body = Vec::new();
    if let Some(path) = path {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"path\"\r\n\r\n{path}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Sign up `username` through the API and return the issued token.
pub async fn sign_up(app: &TestApp, username: &str) -> String {
    let response = app
        .send(json(
            "POST",
            "/api/auth/signup",
            &serde_json::json!({
                "username": username,
                "password": "correct horse",
                "name": "Test User",
                "email": format!("{username}@example.com"),
            }),
        ))
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    response.body["token"].as_str().unwrap().to_string()
}
