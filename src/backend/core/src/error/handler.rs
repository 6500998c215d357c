//! Terminal error handler, not-found fallback and panic conversion.

use super::notify::{dispatch, Alert, AlertNotifier, NoopNotifier};
use super::{ApiError, ErrorKind, ErrorReport};
use axum::{
    body::Body,
    http::{header, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use metrics::counter;
use std::any::Any;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Layer installing the single error-handling point of the pipeline.
///
/// Every error response below this layer passes through it once: it gets its
/// routing context completed, is logged at `error`, counted, and forwarded to
/// the alert notifier when its status reaches the configured threshold.
/// Framework rejections that are not JSON are rewritten into the
/// `{"message": ...}` shape first.
#[derive(Clone)]
pub struct ErrorHandlerLayer {
    notifier: Arc<dyn AlertNotifier>,
    alert_threshold: StatusCode,
}

impl ErrorHandlerLayer {
    pub fn new(notifier: Arc<dyn AlertNotifier>, alert_threshold: StatusCode) -> Self {
        Self {
            notifier,
            alert_threshold,
        }
    }
}

impl Default for ErrorHandlerLayer {
    fn default() -> Self {
        Self::new(Arc::new(NoopNotifier), StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl<S> Layer<S> for ErrorHandlerLayer {
    type Service = ErrorHandlerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorHandlerService {
            inner,
            notifier: self.notifier.clone(),
            alert_threshold: self.alert_threshold,
        }
    }
}

/// Service produced by [`ErrorHandlerLayer`].
#[derive(Clone)]
pub struct ErrorHandlerService<S> {
    inner: S,
    notifier: Arc<dyn AlertNotifier>,
    alert_threshold: StatusCode,
}

impl<S> Service<Request<Body>> for ErrorHandlerService<S>
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
        let mut inner = self.inner.clone();
        let notifier = self.notifier.clone();
        let alert_threshold = self.alert_threshold;

        Box::pin(async move {
            let method = request.method().to_string();
            let path = request.uri().path().to_string();

            let response = inner.call(request).await?;
            let mut response = normalize(response);

            let Some(report) = response.extensions_mut().get_mut::<ErrorReport>() else {
                return Ok(response);
            };
            report.context.complete(&method, &path);

            log_report(report);
            counter!(
                "folio_errors_total",
                "status" => report.status.as_u16().to_string(),
                "kind" => report.kind.as_str(),
            )
            .increment(1);

            if report.status >= alert_threshold {
                let alert = Alert::for_request(
                    &method,
                    &path,
                    report.status.as_u16(),
                    report.operator_message(),
                );
                dispatch(notifier, alert);
            }

            Ok(response)
        })
    }
}

/// Rewrite error responses that did not come from [`ApiError`] and are not
/// JSON (framework rejections, 405s) into the uniform error shape.
fn normalize(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    if response.extensions().get::<ErrorReport>().is_some() {
        return response;
    }

    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    if is_json {
        return response;
    }

    let message = match status {
        StatusCode::BAD_REQUEST => "Invalid request body",
        StatusCode::METHOD_NOT_ALLOWED => "Method not allowed",
        StatusCode::PAYLOAD_TOO_LARGE => "Request body too large",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "Unsupported content type",
        StatusCode::UNPROCESSABLE_ENTITY => "Invalid request body",
        _ if status.is_client_error() => "Client error",
        _ => return ApiError::fault(format!("unhandled {status} response")).into_response(),
    };
    ApiError::new(status, message).into_response()
}

fn log_report(report: &ErrorReport) {
    let method = report.context.method.as_deref().unwrap_or("-");
    let path = report.context.path.as_deref().unwrap_or("-");
    let status = report.status.as_u16();

    match report.kind {
        ErrorKind::Recognized => tracing::error!(
            method = %method,
            path = %path,
            status = status,
            resource = ?report.context.resource,
            message = %report.message,
            "Request failed"
        ),
        ErrorKind::Fault => tracing::error!(
            method = %method,
            path = %path,
            status = status,
            resource = ?report.context.resource,
            error = %report.operator_message(),
            "Unhandled fault"
        ),
    }
}

/// Fallback for requests no route matched.
pub async fn not_found_fallback(uri: Uri) -> ApiError {
    let path = uri.path().to_string();
    ApiError::not_found(format!("Route({path}) not found")).with_path(path)
}

/// Turn a handler panic into an unrecognized fault.
///
/// Used with `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    ApiError::fault(format!("panic: {detail}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorBody, INTERNAL_ERROR_MESSAGE};
    use async_trait::async_trait;
    use axum::{routing::get, Router};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;
    use tower_http::catch_panic::CatchPanicLayer;

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertNotifier for RecordingNotifier {
        async fn notify(&self, alert: Alert) -> Result<(), crate::error::NotifyError> {
            self.alerts.lock().push(alert);
            Ok(())
        }
    }

    async fn panics() -> &'static str {
        panic!("kaboom")
    }

    fn app(notifier: Arc<RecordingNotifier>) -> Router {
        Router::new()
            .route(
                "/conflict",
                get(|| async { Err::<(), _>(ApiError::conflict("bob already exists")) }),
            )
            .route(
                "/fault",
                get(|| async { Err::<(), _>(ApiError::fault("db exploded")) }),
            )
            .route("/panic", get(panics))
            .route("/plain", get(|| async { (StatusCode::BAD_REQUEST, "parse error at 3:14") }))
            .fallback(not_found_fallback)
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(ErrorHandlerLayer::new(notifier, StatusCode::INTERNAL_SERVER_ERROR))
    }

    async fn send(app: Router, uri: &str) -> (StatusCode, Option<ErrorReport>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let report = response.extensions().get::<ErrorReport>().cloned();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, report, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_recognized_error_passes_message() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (status, report, body) = send(app(notifier.clone()), "/conflict").await;

        assert_eq!(status, StatusCode::CONFLICT);
        let body: ErrorBody = serde_json::from_str(&body).unwrap();
        assert_eq!(body.message, "bob already exists");

        let report = report.unwrap();
        assert_eq!(report.context.method.as_deref(), Some("GET"));
        assert_eq!(report.context.path.as_deref(), Some("/conflict"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(notifier.alerts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fault_is_generic_and_alerted() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (status, _, body) = send(app(notifier.clone()), "/fault").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: ErrorBody = serde_json::from_str(&body).unwrap();
        assert_eq!(body.message, INTERNAL_ERROR_MESSAGE);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let alerts = notifier.alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "Server Error on GET /fault 500");
        assert_eq!(alerts[0].text, "db exploded");
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (status, report, body) = send(app(notifier), "/panic").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("kaboom"));
        assert_eq!(report.unwrap().detail.as_deref(), Some("panic: kaboom"));
    }

    #[tokio::test]
    async fn test_plain_rejection_is_normalized() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (status, report, body) = send(app(notifier), "/plain").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(report.is_some());
        let body: ErrorBody = serde_json::from_str(&body).unwrap();
        assert_eq!(body.message, "Invalid request body");
    }

    #[tokio::test]
    async fn test_not_found_fallback_is_stable() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (first_status, _, first) = send(app(notifier.clone()), "/nope").await;
        let (second_status, _, second) = send(app(notifier), "/nope").await;

        assert_eq!(first_status, StatusCode::NOT_FOUND);
        assert_eq!(first_status, second_status);
        assert_eq!(first, second);
        let body: ErrorBody = serde_json::from_str(&first).unwrap();
        assert_eq!(body.message, "Route(/nope) not found");
    }
}
