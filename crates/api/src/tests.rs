use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use questline_domain::admission::{InMemoryAdmissionLock, admission_keys};
use questline_domain::ports::admission::AdmissionLock;
use questline_domain::ports::BoxFuture;
use questline_domain::ports::store::{Filter, RecordStore, Row, StoreError};
use questline_domain::quest::{ACCEPTED_QUESTS_TABLE, IdentityField};
use questline_domain::records::InMemoryRecordStore;
use questline_infra::config::AppConfig;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::error::ApiError;
use crate::middleware::error_envelope;
use crate::routes;
use crate::state::{AppState, memory_store};

const ORIGIN: &str = "https://jupcatdemy.com";

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        data_backend: "memory".to_string(),
        store_url: String::new(),
        store_api_key: String::new(),
        store_timeout_ms: 1_000,
        allowed_origin: ORIGIN.to_string(),
        lock_backend: "memory".to_string(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        admission_lock_ttl_ms: 30_000,
        admission_claim_wait_ms: 2_000,
        request_timeout_ms: 5_000,
        rate_limit_per_second: 50,
        rate_limit_burst: 100,
    }
}

fn test_app_with_store(store: Arc<dyn RecordStore>) -> axum::Router {
    let state = AppState::with_backends(
        test_config(),
        store,
        Arc::new(InMemoryAdmissionLock::new()),
    );
    routes::router(state)
}

fn test_app() -> (InMemoryRecordStore, axum::Router) {
    let store = memory_store();
    let app = test_app_with_store(Arc::new(store.clone()));
    (store, app)
}

/// Delays every read before handing it to the in-memory store.
struct SlowStore {
    inner: InMemoryRecordStore,
    delay: Duration,
}

impl RecordStore for SlowStore {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn find_one<'a>(
        &'a self,
        table: &'a str,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, Result<Option<Row>, StoreError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.find_one(table, filters).await
        })
    }

    fn insert<'a>(&'a self, table: &'a str, row: Row) -> BoxFuture<'a, Result<Row, StoreError>> {
        self.inner.insert(table, row)
    }
}

struct FailingStore;

impl RecordStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn find_one<'a>(
        &'a self,
        _table: &'a str,
        _filters: &'a [Filter],
    ) -> BoxFuture<'a, Result<Option<Row>, StoreError>> {
        Box::pin(async { Err::<Option<Row>, _>(StoreError::Unavailable("connection reset".into())) })
    }

    fn insert<'a>(&'a self, _table: &'a str, _row: Row) -> BoxFuture<'a, Result<Row, StoreError>> {
        Box::pin(async { Err::<Row, _>(StoreError::Unavailable("connection reset".into())) })
    }
}

fn submit_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/submit")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn check_request(query: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!("/check-submission?{query}"))
        .body(Body::empty())
        .expect("request")
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

#[tokio::test]
async fn health_reports_backend() {
    let (_store, app) = test_app();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["data_backend"], "memory");
}

#[tokio::test]
async fn second_identical_submission_is_pending() {
    let (store, app) = test_app();
    let payload = json!({
        "questType": "discord",
        "submissionData": { "discordUsername": "alice", "questId": "q1" }
    });

    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Submission received");
    assert_eq!(body["data"]["quest_id"], "q1");
    assert_eq!(body["data"]["discord_username"], "alice");
    assert_eq!(body["data"]["status"], false);
    assert!(body["data"].get("twitter_username").is_none());

    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "already_pending");
    assert!(body["error"].as_str().unwrap().contains("pending approval"));

    assert_eq!(store.rows("discord_pending_submissions").await.len(), 1);
}

#[tokio::test]
async fn legacy_numeric_quest_type_and_top_level_quest_id_are_accepted() {
    let (store, app) = test_app();
    let payload = json!({
        "questId": "q9",
        "questType": 2,
        "submissionData": {
            "twitterUsername": "bob",
            "tweetPostLink": "https://x.com/bob/status/1",
            "questId": "ignored"
        }
    });

    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["quest_id"], "q9");
    assert_eq!(body["data"]["tweet_post_link"], "https://x.com/bob/status/1");
    assert_eq!(store.rows("twitter_pending_submissions").await.len(), 1);
}

#[tokio::test]
async fn invalid_quest_types_are_rejected() {
    let (_store, app) = test_app();
    for quest_type in [json!(4), json!("invalid"), json!({"kind": "discord"})] {
        let payload = json!({
            "questType": quest_type,
            "submissionData": { "discordUsername": "alice", "questId": "q1" }
        });
        let (status, body) = send(&app, submit_request(&payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_quest_type");
    }
}

#[tokio::test]
async fn missing_quest_id_and_quest_type_are_reported() {
    let (_store, app) = test_app();

    let payload = json!({
        "questType": "twitter",
        "submissionData": { "twitterUsername": "bob" }
    });
    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "missing_required_fields");
    assert_eq!(body["error"], "Missing required fields: questId");

    let payload = json!({ "submissionData": { "twitterUsername": "bob", "questId": "q1" } });
    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields: questType");
}

#[tokio::test]
async fn onboarding_requires_user_status() {
    let (_store, app) = test_app();
    let payload = json!({
        "questType": "onboarding",
        "questId": "welcome",
        "submissionData": { "discordUsername": "a", "twitterUsername": "b" }
    });
    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields: userStatus");
}

#[tokio::test]
async fn onboarding_duplicate_on_one_identity_is_rejected() {
    let (_store, app) = test_app();
    let first = json!({
        "questType": "onboarding",
        "questId": "welcome",
        "submissionData": { "discordUsername": "a", "twitterUsername": "b", "userStatus": "new" }
    });
    let (status, _) = send(&app, submit_request(&first)).await;
    assert_eq!(status, StatusCode::OK);

    let second = json!({
        "questType": "onboarding",
        "questId": "welcome",
        "submissionData": { "discordUsername": "changed", "twitterUsername": "b", "userStatus": "new" }
    });
    let (status, body) = send(&app, submit_request(&second)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "already_pending");
}

#[tokio::test]
async fn accepted_quest_blocks_resubmission() {
    let (store, app) = test_app();
    let accepted = json!({"quest_id": "q1", "quest_type": "discord", "discord_username": "alice"});
    store
        .seed(ACCEPTED_QUESTS_TABLE, accepted.as_object().cloned().unwrap())
        .await;

    let payload = json!({
        "questType": "discord",
        "submissionData": { "discordUsername": "alice", "questId": "q1" }
    });
    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "already_completed");
    assert_eq!(body["error"], "You have already completed this quest.");
    assert!(store.rows("discord_pending_submissions").await.is_empty());
}

#[tokio::test]
async fn malformed_body_is_an_invalid_request() {
    let (_store, app) = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/submit")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn oversized_fields_fail_validation() {
    let (_store, app) = test_app();
    let payload = json!({
        "questType": "discord",
        "submissionData": { "discordUsername": "a".repeat(200), "questId": "q1" }
    });
    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn store_failures_become_server_errors() {
    let app = test_app_with_store(Arc::new(FailingStore));
    let payload = json!({
        "questType": "discord",
        "submissionData": { "discordUsername": "alice", "questId": "q1" }
    });
    let (status, body) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "store_error");
    assert_eq!(body["error"], "store unavailable: connection reset");

    let (status, body) = send(&app, check_request("username=alice&quest_id=q1&quest_type=1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("connection reset"));
}

#[tokio::test]
async fn unsupported_methods_get_405() {
    let (_store, app) = test_app();

    let request = Request::builder()
        .method("GET")
        .uri("/submit")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["code"], "method_not_allowed");

    let request = Request::builder()
        .method("DELETE")
        .uri("/check-submission")
        .body(Body::empty())
        .expect("request");
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn cors_preflight_is_answered_for_the_configured_origin() {
    let (_store, app) = test_app();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/submit")
        .header("origin", ORIGIN)
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some(ORIGIN)
    );
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert!(bytes.is_empty());

    let bare = Request::builder()
        .method("OPTIONS")
        .uri("/check-submission")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&app, bare).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn other_origins_get_no_cors_grant() {
    let (_store, app) = test_app();
    let request = Request::builder()
        .method("GET")
        .uri("/check-submission?username=alice&quest_id=q1&quest_type=discord")
        .header("origin", "https://evil.example")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get("access-control-allow-origin")
            .is_none_or(|value| value != "https://evil.example")
    );
}

#[tokio::test]
async fn check_submission_reports_pending_rows() {
    let (_store, app) = test_app();

    let (status, body) = send(&app, check_request("username=bob&quest_id=welcome&quest_type=3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "exists": false }));

    let payload = json!({
        "questType": "onboarding",
        "questId": "welcome",
        "submissionData": { "discordUsername": "alice", "twitterUsername": "bob", "userStatus": "new" }
    });
    let (status, _) = send(&app, submit_request(&payload)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, check_request("username=bob&quest_id=welcome&quest_type=3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["message"], "You have already submitted this quest.");

    let (_, body) = send(&app, check_request("username=bob&quest_id=welcome&quest_type=twitter")).await;
    assert_eq!(body["exists"], false);
}

#[tokio::test]
async fn check_submission_validates_query() {
    let (_store, app) = test_app();

    let (status, body) = send(&app, check_request("username=alice")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields: quest_id, quest_type");

    let (status, body) = send(&app, check_request("username=alice&quest_id=q1&quest_type=4")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_quest_type");
}

#[tokio::test]
async fn responses_carry_request_and_correlation_ids() {
    let (_store, app) = test_app();
    let request = Request::builder()
        .uri("/health")
        .header("x-correlation-id", "corr-1")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response
            .headers()
            .get("x-correlation-id")
            .and_then(|value| value.to_str().ok()),
        Some("corr-1")
    );
}

fn discord_payload() -> Value {
    json!({
        "questType": "discord",
        "submissionData": { "discordUsername": "alice", "questId": "q1" }
    })
}

#[tokio::test]
async fn timed_out_submission_does_not_block_the_retry() {
    let store = memory_store();
    let lock = Arc::new(InMemoryAdmissionLock::new());

    let slow_config = AppConfig {
        request_timeout_ms: 30,
        ..test_config()
    };
    let slow_app = routes::router(AppState::with_backends(
        slow_config,
        Arc::new(SlowStore {
            inner: store.clone(),
            delay: Duration::from_secs(5),
        }),
        lock.clone(),
    ));
    let (status, body) = send(&slow_app, submit_request(&discord_payload())).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["code"], "request_timeout");
    assert_eq!(body["error"], "Request timed out");

    let app = routes::router(AppState::with_backends(
        test_config(),
        Arc::new(store.clone()),
        lock,
    ));
    let (status, body) = send(&app, submit_request(&discord_payload())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(store.rows("discord_pending_submissions").await.len(), 1);
}

#[tokio::test]
async fn claim_held_past_the_wait_is_a_retryable_error() {
    let lock = Arc::new(InMemoryAdmissionLock::new());
    let key = admission_keys(
        "discord_pending_submissions",
        "q1",
        &[(IdentityField::DiscordUsername, "alice".to_string())],
    )
    .remove(0);
    assert!(
        lock.try_acquire(&key, "in-flight", Duration::from_secs(60))
            .await
            .unwrap()
    );
    let config = AppConfig {
        admission_claim_wait_ms: 40,
        ..test_config()
    };
    let store = memory_store();
    let app = routes::router(AppState::with_backends(
        config,
        Arc::new(store.clone()),
        lock,
    ));

    let (status, body) = send(&app, submit_request(&discord_payload())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "admission_busy");
    assert!(store.rows("discord_pending_submissions").await.is_empty());
}

#[tokio::test]
async fn rate_limit_rejections_get_the_error_body() {
    let rejection: Response = (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "2")],
        "Too Many Requests! Wait for 2s",
    )
        .into_response();

    let response = error_envelope(rejection).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok()),
        Some("2")
    );
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["code"], "rate_limited");
    assert_eq!(body["error"], "Too many requests");
}

#[tokio::test]
async fn handler_errors_pass_through_the_envelope_unchanged() {
    let response = error_envelope(ApiError::AlreadyPending.into_response()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["code"], "already_pending");
}
