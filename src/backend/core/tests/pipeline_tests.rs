//! Request pipeline behavior through the assembled router.
//!
//! Covers the cross-cutting stages:
//! - Auth guard rejections (missing, malformed, expired, unknown subject)
//! - Validation failures and their messages
//! - Rate limiting per client and window reset
//! - Not-found fallback and uniform error bodies
//! - One log record per request, carrying the response message
//! - Alerts for errors at or above the threshold
//! - CORS and the metrics route

mod common;

use axum::http::{header, StatusCode};
use common::*;
use folio_core::api::Pipeline;
use folio_core::error::{ErrorHandlerLayer, WebhookNotifier};
use folio_core::middleware::{Claims, RateLimitConfig, RateLimiter};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn limited(max_requests: u64, window: Duration) -> Pipeline {
    Pipeline {
        rate_limiter: Arc::new(RateLimiter::new(
            RateLimitConfig::builder()
                .window(window)
                .max_requests(max_requests)
                .build(),
        )),
        ..Pipeline::default()
    }
}

// ============================================================================
// Auth Guard
// ============================================================================

#[tokio::test]
async fn test_missing_credentials_rejected() {
    let app = app();
    let response = app.send(get("/api/auth/me")).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body, json!({"message": "Authorization Error"}));
}

#[tokio::test]
async fn test_malformed_token_rejected() {
    let app = app();
    let response = app.send(bearer(get("/api/auth/me"), "not.a.jwt")).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = app.send(cookie(get("/api/auth/me"), "garbage")).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let app = app();
    sign_up(&app, "expired").await;
    let user = app
        .state
        .users
        .find_by_username("expired")
        .await
        .unwrap()
        .unwrap();

    let now = chrono::Utc::now().timestamp();
    let token = app
        .state
        .authenticator
        .generate_token(&Claims {
            sub: user.id,
            iat: now - 120,
            exp: now - 60,
        })
        .unwrap();

    let response = app.send(bearer(get("/api/auth/me"), &token)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["message"], "Authorization Error");
}

#[tokio::test]
async fn test_token_for_unknown_user_rejected() {
    let app = app();
    let token = app.state.authenticator.issue("no-such-user").unwrap();

    let response = app.send(bearer(get("/api/auth/me"), &token)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_signed_with_other_secret_rejected() {
    use folio_core::middleware::{AuthConfig, Authenticator};

    let app = app();
    sign_up(&app, "victim").await;
    let user = app.state.users.find_by_username("victim").await.unwrap().unwrap();

    let forger = Authenticator::new(AuthConfig::builder().jwt_secret("other").build()).unwrap();
    let token = forger.issue(&user.id).unwrap();

    let response = app.send(bearer(get("/api/auth/me"), &token)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cookie_credentials_accepted() {
    let app = app();
    let token = sign_up(&app, "cookie").await;

    let response = app.send(cookie(get("/api/auth/me"), &token)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["username"], "cookie");
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_empty_username_rejected() {
    let app = app();
    let response = app
        .send(json(
            "POST",
            "/api/auth/signup",
            &json!({"username": "", "password": "pw", "name": "n", "email": "a@b.co"}),
        ))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body, json!({"message": "Username should be not empty"}));
    assert!(app.state.users.find_by_username("").await.unwrap().is_none());
}

#[tokio::test]
async fn test_first_violation_wins() {
    let app = app();
    let response = app
        .send(json("POST", "/api/auth/signup", &json!({"email": "nope"})))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.body["message"],
        "Invalid type: Expected string but received undefined"
    );
}

#[tokio::test]
async fn test_wrong_type_reports_expected_type() {
    let app = app();
    let response = app
        .send(json(
            "POST",
            "/api/auth/login",
            &json!({"username": 42, "password": "pw"}),
        ))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.body["message"],
        "Invalid type: Expected string but received number"
    );
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let app = app();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{\"username\":"))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["message"], "Invalid request body");
}

// ============================================================================
// Rate Limiter
// ============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_then_resets() {
    let app = app_with(limited(2, Duration::from_millis(300)));

    assert_eq!(app.send(get("/api/works")).await.status, StatusCode::OK);
    assert_eq!(app.send(get("/api/works")).await.status, StatusCode::OK);

    let rejected = app.send(get("/api/works")).await;
    assert_eq!(rejected.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        rejected.body,
        json!({"message": "You can only make 2 requests every 300ms"})
    );
    assert!(rejected.headers.contains_key("retry-after"));

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(app.send(get("/api/works")).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let app = app_with(limited(1, Duration::from_secs(60)));

    assert_eq!(
        app.send(from_peer(get("/api/works"), "10.0.0.1:4000")).await.status,
        StatusCode::OK
    );
    assert_eq!(
        app.send(from_peer(get("/api/works"), "10.0.0.2:4000")).await.status,
        StatusCode::OK
    );
    assert_eq!(
        app.send(from_peer(get("/api/works"), "10.0.0.1:4001")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_rotating_forwarded_for_does_not_reset_window() {
    let app = app_with(limited(2, Duration::from_secs(60)));

    let mut statuses = Vec::new();
    for i in 0..5 {
        let mut request = from_peer(get("/api"), "192.0.2.10:5000");
        request
            .headers_mut()
            .insert("x-forwarded-for", format!("10.9.9.{i}").parse().unwrap());
        statuses.push(app.send(request).await.status);
    }

    assert_eq!(
        statuses,
        [
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );
}

#[tokio::test]
async fn test_trusted_proxy_header_keys_clients() {
    let pipeline = Pipeline {
        rate_limiter: Arc::new(RateLimiter::new(
            RateLimitConfig::builder()
                .window(Duration::from_secs(60))
                .max_requests(1)
                .trusted_proxy_headers(vec!["X-Forwarded-For".to_string()])
                .build(),
        )),
        ..Pipeline::default()
    };
    let app = app_with(pipeline);
    let behind_proxy = |client: &str| {
        let mut request = from_peer(get("/api/works"), "10.0.0.254:80");
        request
            .headers_mut()
            .insert("x-forwarded-for", client.parse().unwrap());
        request
    };

    assert_eq!(app.send(behind_proxy("203.0.113.1")).await.status, StatusCode::OK);
    assert_eq!(app.send(behind_proxy("203.0.113.2")).await.status, StatusCode::OK);
    assert_eq!(
        app.send(behind_proxy("203.0.113.1")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_rate_limit_covers_unmatched_routes() {
    let app = app_with(limited(1, Duration::from_secs(60)));

    assert_eq!(app.send(get("/nowhere")).await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        app.send(get("/nowhere")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
}

// ============================================================================
// Error Channel
// ============================================================================

#[tokio::test]
async fn test_not_found_body_is_stable() {
    let app = app();
    let first = app.send(get("/api/missing")).await;
    let second = app.send(get("/api/missing")).await;

    assert_eq!(first.status, StatusCode::NOT_FOUND);
    assert_eq!(first.body, json!({"message": "Route(/api/missing) not found"}));
    assert_eq!(first.body, second.body);
}

#[tokio::test]
async fn test_alert_sent_for_errors_over_threshold() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(format!("{}/alerts", server.uri()), None).unwrap();
    let app = app_with(Pipeline {
        error_handler: ErrorHandlerLayer::new(Arc::new(notifier), StatusCode::NOT_FOUND),
        ..Pipeline::default()
    });

    let response = app.send(get("/api/gone")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let mut delivered = Vec::new();
    for _ in 0..50 {
        delivered = server.received_requests().await.unwrap_or_default();
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered.len(), 1);
    let alert: serde_json::Value = serde_json::from_slice(&delivered[0].body).unwrap();
    assert_eq!(alert["title"], "Server Error on GET /api/gone 404");
    assert_eq!(alert["text"], "Route(/api/gone) not found");
}

#[tokio::test]
async fn test_no_alert_below_threshold() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri(), None).unwrap();
    let app = app_with(Pipeline {
        error_handler: ErrorHandlerLayer::new(Arc::new(notifier), StatusCode::INTERNAL_SERVER_ERROR),
        ..Pipeline::default()
    });

    app.send(get("/api/gone")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

// ============================================================================
// Logger
// ============================================================================

#[tokio::test]
async fn test_one_record_per_request() {
    let app = app();
    app.send(get("/api")).await;
    app.send(get("/api/missing")).await;
    app.send(get("/api/auth/me")).await;

    let records = app.sink.records();
    assert_eq!(records.len(), 3);

    assert_eq!(records[0].status, 200);
    assert_eq!(records[0].message, None);

    assert_eq!(records[1].status, 404);
    assert_eq!(records[1].path, "/api/missing");
    assert_eq!(records[1].message.as_deref(), Some("Route(/api/missing) not found"));

    assert_eq!(records[2].status, 401);
    assert_eq!(records[2].message.as_deref(), Some("Authorization Error"));
}

#[tokio::test]
async fn test_rejected_requests_are_logged() {
    let app = app_with(limited(1, Duration::from_secs(60)));
    app.send(get("/api/works")).await;
    let rejected = app.send(get("/api/works")).await;

    let records = app.sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].status, 429);
    assert_eq!(records[1].message.as_deref(), rejected.body["message"].as_str());
}

#[tokio::test]
async fn test_request_id_echoed() {
    let app = app();
    let mut request = get("/api");
    request
        .headers_mut()
        .insert("x-request-id", "req-123".parse().unwrap());

    let response = app.send(request).await;
    assert_eq!(response.headers["x-request-id"], "req-123");
    assert_eq!(app.sink.records()[0].request_id, "req-123");
}

// ============================================================================
// CORS and metrics
// ============================================================================

#[tokio::test]
async fn test_cors_mirrors_allowed_origin() {
    let app = app_with(Pipeline {
        cors_allow_origin: Some(regex::Regex::new(r"^https://folio\.example$").unwrap()),
        ..Pipeline::default()
    });

    let mut request = get("/api/works");
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://folio.example".parse().unwrap());
    let response = app.send(request).await;
    assert_eq!(
        response.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://folio.example"
    );
    assert_eq!(response.headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

    let mut request = get("/api/works");
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://evil.example".parse().unwrap());
    let response = app.send(request).await;
    assert!(!response.headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn test_metrics_route_skips_rate_limit() {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let app = app_with(Pipeline {
        metrics: Some(handle),
        ..limited(1, Duration::from_secs(60))
    });

    app.send(get("/api/works")).await;
    assert_eq!(
        app.send(get("/api/works")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(app.send(get("/metrics")).await.status, StatusCode::OK);
    assert_eq!(app.send(get("/metrics")).await.status, StatusCode::OK);
}
