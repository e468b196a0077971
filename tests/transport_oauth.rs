// tests/transport_oauth.rs
//
// HTTPS API transport against a mocked token endpoint and send endpoint.

mod common;

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chrono::Utc;
use serde_json::{json, Value as Json};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{pipeline_with, scheduler_for};
use news_digest::config::OAuthConfig;
use news_digest::notify::{DeliveryResult, HttpsApiTransport};
use news_digest::scheduler::SchedulerState;

const SEND_PATH: &str = "/gmail/v1/users/me/messages/send";

fn oauth(server: &MockServer, access_token: Option<&str>) -> OAuthConfig {
    OAuthConfig {
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        refresh_token: "refresh-token".into(),
        access_token: access_token.map(str::to_string),
        token_uri: format!("{}/token", server.uri()),
        api_base: server.uri(),
    }
}

#[tokio::test]
async fn revoked_refresh_token_reports_auth_error_and_keeps_scheduler_armed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let transport = Arc::new(HttpsApiTransport::new(oauth(&server, None)).expect("client"));
    let (pipeline, diagnostics) = pipeline_with(vec![], transport, &["reader@example.com"]);
    let scheduler = scheduler_for(pipeline.clone(), diagnostics.clone());
    scheduler.arm(Utc::now()).expect("arms");

    let report = pipeline.send_test_message().await.expect("composes");
    assert_eq!(report.result, DeliveryResult::AuthError);
    assert_eq!(report.transport, "https_api");
    assert_eq!(report.delivery.failed, vec!["reader@example.com".to_string()]);
    let detail = report.delivery.last_error().and_then(|a| a.detail.clone()).unwrap_or_default();
    assert!(detail.contains("invalid_grant"), "detail: {detail}");

    // A test send is not a run and does not disturb the scheduler.
    assert!(diagnostics.runs(10).is_empty());
    let health = scheduler.health();
    assert!(matches!(health.scheduler, SchedulerState::Armed { .. }));
    assert_eq!(health.status, "ok");
    assert_eq!(health.transport, Some("https_api"));
}

#[tokio::test]
async fn refreshed_token_is_used_for_a_base64url_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Arc::new(HttpsApiTransport::new(oauth(&server, None)).expect("client"));
    let (pipeline, _) = pipeline_with(vec![], transport, &["reader@example.com"]);

    let report = pipeline.send_test_message().await.expect("composes");
    assert_eq!(report.result, DeliveryResult::Sent);

    let requests = server.received_requests().await.expect("recording enabled");
    let send = requests
        .iter()
        .find(|r| r.url.path() == SEND_PATH)
        .expect("send request");
    let body: Json = serde_json::from_slice(&send.body).expect("json body");
    let raw = body["raw"].as_str().expect("raw field");
    let decoded = URL_SAFE.decode(raw).expect("base64url");
    let message = String::from_utf8_lossy(&decoded);
    assert!(message.contains("To: reader@example.com"));
    assert!(message.contains("Subject: Test Digest (test)"));
    assert!(message.contains("multipart/alternative"));
}

#[tokio::test]
async fn stale_stored_token_is_refreshed_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Arc::new(HttpsApiTransport::new(oauth(&server, Some("stale-token"))).expect("client"));
    let (pipeline, _) = pipeline_with(vec![], transport, &["reader@example.com"]);

    let report = pipeline.send_test_message().await.expect("composes");
    assert_eq!(report.result, DeliveryResult::Sent);
    assert_eq!(report.delivery.attempts.len(), 1);
}

#[tokio::test]
async fn send_quota_maps_to_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let transport = Arc::new(HttpsApiTransport::new(oauth(&server, Some("token"))).expect("client"));
    let (pipeline, _) = pipeline_with(vec![], transport, &["reader@example.com"]);

    let report = pipeline.send_test_message().await.expect("composes");
    assert_eq!(report.result, DeliveryResult::RateLimited);
    assert_eq!(report.delivery.attempts.len(), 2);
}
