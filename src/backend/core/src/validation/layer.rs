//! Tower layer that validates request bodies against a [`Schema`].
//!
//! The body is buffered, parsed by content type (JSON or multipart) and
//! checked. On success the request continues with its original bytes and the
//! parsed [`Payload`] in its extensions, where handlers pick it up with the
//! `Payload` extractor. On failure the request ends with a 400.

use crate::error::ApiError;
use crate::validation::error::ValidationError;
use crate::validation::validator::Schema;
use crate::validation::value::{FormData, FormField, Payload, UploadedFile};
use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Multipart},
    http::{header, request::Parts, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

/// Default cap on buffered bodies (1 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Validation layer for Tower. Apply with `route_layer` so it only runs on
/// matched routes.
#[derive(Clone)]
pub struct ValidateLayer {
    schema: Arc<Schema>,
    body_limit: usize,
    oversized: Option<Arc<ValidationError>>,
}

impl ValidateLayer {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
            body_limit: DEFAULT_BODY_LIMIT,
            oversized: None,
        }
    }

    /// Maximum number of body bytes to buffer.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Error reported when the body exceeds the limit, instead of
    /// [`ValidationError::BodyTooLarge`].
    pub fn oversized_as(mut self, error: ValidationError) -> Self {
        self.oversized = Some(Arc::new(error));
        self
    }
}

impl<S> Layer<S> for ValidateLayer {
    type Service = ValidateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidateService {
            inner,
            schema: self.schema.clone(),
            body_limit: self.body_limit,
            oversized: self.oversized.clone(),
        }
    }
}

/// Validation service.
#[derive(Clone)]
pub struct ValidateService<S> {
    inner: S,
    schema: Arc<Schema>,
    body_limit: usize,
    oversized: Option<Arc<ValidationError>>,
}

impl<S> Service<Request<Body>> for ValidateService<S>
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

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let schema = self.schema.clone();
        let body_limit = self.body_limit;
        let oversized = self.oversized.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            let checked = async {
                let bytes = read_body(&parts.headers, body, body_limit)
                    .await
                    .map_err(|e| match (e, &oversized) {
                        (ValidationError::BodyTooLarge, Some(error)) => error.as_ref().clone(),
                        (e, _) => e,
                    })?;
                let payload = parse_payload(&parts, bytes.clone()).await?;
                schema.validate(&payload)?;
                Ok::<_, ValidationError>((bytes, payload))
            }
            .await;

            match checked {
                Ok((bytes, payload)) => {
                    parts.extensions.insert(payload);
                    inner.call(Request::from_parts(parts, Body::from(bytes))).await
                }
                Err(e) => {
                    debug!(error = %e, field = ?e.field_name(), "Request body rejected");
                    Ok(ApiError::from(e)
                        .with_method(parts.method.as_str())
                        .with_path(parts.uri.path())
                        .into_response())
                }
            }
        })
    }
}

async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, ValidationError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ValidationError::BodyTooLarge);
    }

    axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ValidationError::BodyTooLarge)
}

/// Parse a buffered body according to its content type.
///
/// A missing content type is treated as JSON; an empty JSON body is treated
/// as an empty object so every required field reports as missing.
pub async fn parse_payload(parts: &Parts, bytes: Bytes) -> Result<Payload, ValidationError> {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "multipart/form-data" {
        return parse_multipart(parts, bytes).await.map(Payload::Form);
    }
    if mime != "application/json" && !mime.ends_with("+json") {
        return Err(ValidationError::UnsupportedContentType);
    }

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::Json(Value::Object(Default::default())));
    }
    serde_json::from_slice(&bytes)
        .map(Payload::Json)
        .map_err(|e| ValidationError::malformed(e.to_string()))
}

async fn parse_multipart(parts: &Parts, bytes: Bytes) -> Result<FormData, ValidationError> {
    // Headers and extensions carry the boundary and any body limit override.
    let mut form_request = Request::new(Body::from(bytes));
    *form_request.headers_mut() = parts.headers.clone();
    *form_request.extensions_mut() = parts.extensions.clone();

    let mut multipart = Multipart::from_request(form_request, &())
        .await
        .map_err(|e| ValidationError::malformed(e.body_text()))?;

    let mut form = FormData::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ValidationError::malformed(e.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ValidationError::malformed(e.to_string()))?;
                form.push(
                    name,
                    FormField::File(UploadedFile {
                        name: file_name,
                        content_type,
                        data,
                    }),
                );
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ValidationError::malformed(e.to_string()))?;
                form.push(name, FormField::Text(text));
            }
        }
    }
    Ok(form)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Payload Extractor
// ═══════════════════════════════════════════════════════════════════════════════

impl Payload {
    /// Deserialize a validated JSON payload.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ValidationError> {
        match self {
            Self::Json(value) => {
                serde_json::from_value(value).map_err(|e| ValidationError::malformed(e.to_string()))
            }
            Self::Form(_) => Err(ValidationError::UnsupportedContentType),
        }
    }

    /// The parts of a validated multipart payload.
    pub fn into_form(self) -> Result<FormData, ValidationError> {
        match self {
            Self::Form(form) => Ok(form),
            Self::Json(_) => Err(ValidationError::UnsupportedContentType),
        }
    }
}

/// Extractor for the payload validated by [`ValidateLayer`].
#[async_trait]
impl<S> FromRequestParts<S> for Payload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .remove::<Payload>()
            .ok_or_else(|| ApiError::fault("route has no validated payload"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorBody;
    use crate::validation::rules::{non_empty, ImageFile, IsFile, MaxFileSize};
    use crate::validation::validator::FieldValidator;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde::Deserialize;
    use serde_json::json;
    use tower::ServiceExt;

    #[derive(Deserialize)]
    struct Login {
        username: String,
    }

    async fn echo_username(payload: Payload) -> crate::error::Result<String> {
        let login: Login = payload.into_json()?;
        Ok(login.username)
    }

    async fn echo_raw(Json(value): Json<Value>) -> String {
        value["username"].as_str().unwrap_or_default().to_string()
    }

    async fn file_size(payload: Payload) -> crate::error::Result<String> {
        let form = payload.into_form()?;
        Ok(form.file("file").map(|f| f.size()).unwrap_or(0).to_string())
    }

    fn app() -> Router {
        let login = || {
            Schema::new()
                .field(FieldValidator::new("username").rule(non_empty("Username should be not empty")))
        };
        Router::new()
            .route("/login", post(echo_username))
            .route("/raw", post(echo_raw))
            .route_layer(ValidateLayer::new(login()).body_limit(64))
            .route(
                "/upload",
                post(file_size).route_layer(
                    ValidateLayer::new(
                        Schema::new().field(
                            FieldValidator::new("file")
                                .rule(IsFile::new("File should be File"))
                                .rule(ImageFile::new("Only image files are accepted"))
                                .rule(MaxFileSize::new(16)),
                        ),
                    )
                    .body_limit(512)
                    .oversized_as(MaxFileSize::new(16).exceeded("file")),
                ),
            )
    }

    async fn send(request: Request<Body>) -> (StatusCode, String) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn message(body: &str) -> String {
        serde_json::from_str::<ErrorBody>(body).unwrap().message
    }

    #[tokio::test]
    async fn test_empty_username_rejected() {
        let (status, body) = send(json_request("/login", r#"{"username": ""}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body), "Username should be not empty");
    }

    #[tokio::test]
    async fn test_valid_body_reaches_handler_unchanged() {
        let (status, body) = send(json_request("/login", r#"{"username": "bob"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "bob");

        let (status, body) = send(json_request("/raw", r#"{"username": "alice"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice");
    }

    #[tokio::test]
    async fn test_malformed_and_oversized_bodies() {
        let (status, body) = send(json_request("/login", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body), "Invalid request body");

        let big = json!({"username": "x".repeat(200)}).to_string();
        let (status, body) = send(json_request("/login", &big)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body), "Request body too large");
    }

    #[tokio::test]
    async fn test_empty_body_reports_missing_field() {
        let (status, body) = send(json_request("/login", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            message(&body),
            "Invalid type: Expected string but received undefined"
        );
    }

    fn multipart(content_type: &str, data: &[u8]) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_multipart_file_rules() {
        let (status, body) = send(multipart("image/png", b"12345")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "5");

        let (status, body) = send(multipart("text/plain", b"12345")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body), "Only image files are accepted");

        let (status, body) = send(multipart("image/png", &[0u8; 32])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body), "Max size is 16 B");
    }

    #[tokio::test]
    async fn test_body_over_limit_reports_configured_error() {
        let (status, body) = send(multipart("image/png", &[0u8; 4096])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body), "Max size is 16 B");
    }
}
