// Integration tests for magic-link issuance limits through the HTTP API

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use timevault::api::{create_magic_link_router, LinkSender, MagicLinkAppState};
use timevault::ratelimit::RateLimiter;
use timevault::store::MemoryStore;
use tower::ServiceExt;

/// Counts sends and keeps the most recently delivered token, playing the
/// role of the user's inbox.
#[derive(Default)]
struct RecordingSender {
    sends: AtomicUsize,
    last_token: Mutex<Option<String>>,
}

impl RecordingSender {
    fn last_token(&self) -> String {
        self.last_token
            .lock()
            .unwrap()
            .clone()
            .expect("no link delivered")
    }
}

#[async_trait]
impl LinkSender for RecordingSender {
    async fn send(&self, _email: &str, token: &str) -> Result<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        *self.last_token.lock().unwrap() = Some(token.to_string());
        Ok(())
    }
}

struct FailingSender;

#[async_trait]
impl LinkSender for FailingSender {
    async fn send(&self, _email: &str, _token: &str) -> Result<()> {
        bail!("smtp unreachable")
    }
}

fn create_test_app(
    cooldown: Duration,
    window: Duration,
    quota: i64,
    sender: Arc<dyn LinkSender>,
) -> Router {
    let store = Arc::new(MemoryStore::new());
    let limiter = Arc::new(RateLimiter::new(
        store.clone(),
        "test-hash-secret".to_string(),
        cooldown,
        window,
        quota,
    ));
    create_magic_link_router(MagicLinkAppState {
        limiter,
        sender,
        store,
    })
}

fn link_request(email: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/magic-link")
        .header("content-type", "application/json")
        .body(Body::from(format!(r#"{{"email": "{}"}}"#, email)))
        .unwrap()
}

fn complete_request(token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/magic-link/complete")
        .header("content-type", "application/json")
        .body(Body::from(format!(r#"{{"token": "{}"}}"#, token)))
        .unwrap()
}

async fn json_of(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_first_request_sends_a_link() {
    let sender = Arc::new(RecordingSender::default());
    let app = create_test_app(
        Duration::from_secs(90),
        Duration::from_secs(3600),
        3,
        sender.clone(),
    );

    let response = app.oneshot(link_request("user@example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_of(response).await["success"], true);
    assert_eq!(sender.sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_email_rejected_before_limiting() {
    let sender = Arc::new(RecordingSender::default());
    let app = create_test_app(
        Duration::from_secs(90),
        Duration::from_secs(3600),
        3,
        sender.clone(),
    );

    for email in ["", "   ", "no-at-sign"] {
        let response = app.clone().oneshot(link_request(email)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    assert_eq!(sender.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cooldown_denies_immediate_retry() {
    let sender = Arc::new(RecordingSender::default());
    let app = create_test_app(
        Duration::from_secs(90),
        Duration::from_secs(3600),
        3,
        sender.clone(),
    );

    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 90);

    let json = json_of(response).await;
    assert_eq!(json["reason"], "cooldown");
    assert!(json["retry_after_seconds"].as_u64().unwrap() <= 90);

    // The denied attempt never sent anything
    assert_eq!(sender.sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_window_quota_exhausts_after_three_sends() {
    let sender = Arc::new(RecordingSender::default());
    // Cooldown short enough to step over, window long enough to hold
    let app = create_test_app(
        Duration::from_millis(10),
        Duration::from_secs(3600),
        3,
        sender.clone(),
    );

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(link_request("user@example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = json_of(response).await;
    assert_eq!(json["reason"], "rate_limit");
    assert!(json["retry_after_seconds"].as_u64().unwrap() > 0);

    assert_eq!(sender.sends.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_identities_are_isolated() {
    let sender = Arc::new(RecordingSender::default());
    let app = create_test_app(
        Duration::from_secs(90),
        Duration::from_secs(3600),
        3,
        sender.clone(),
    );

    let response = app
        .clone()
        .oneshot(link_request("alice@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A different identity is unaffected by alice's cooldown
    let response = app
        .clone()
        .oneshot(link_request("bob@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // But a case/whitespace variant of alice shares her bucket
    let response = app
        .clone()
        .oneshot(link_request("Alice@Example.com "))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_failed_send_does_not_arm_cooldown() {
    let app = create_test_app(
        Duration::from_secs(90),
        Duration::from_secs(3600),
        3,
        Arc::new(FailingSender),
    );

    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // An immediate retry hits the sender again instead of the cooldown
    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_completing_with_delivered_token_clears_limits() {
    let sender = Arc::new(RecordingSender::default());
    let app = create_test_app(
        Duration::from_secs(90),
        Duration::from_secs(3600),
        1,
        sender.clone(),
    );

    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Redeeming the token that actually arrived earns the clean slate
    let response = app
        .clone()
        .oneshot(complete_request(&sender.last_token()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(sender.sends.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_completion_without_token_cannot_bypass_limits() {
    let sender = Arc::new(RecordingSender::default());
    let app = create_test_app(
        Duration::from_secs(90),
        Duration::from_secs(3600),
        1,
        sender.clone(),
    );

    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Guessing does not count as proof of possession
    let response = app
        .clone()
        .oneshot(complete_request("forged-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The limiter state is untouched: the next issuance is still denied
    let response = app
        .clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(sender.sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_token_is_single_use() {
    let sender = Arc::new(RecordingSender::default());
    let app = create_test_app(
        Duration::from_secs(90),
        Duration::from_secs(3600),
        1,
        sender.clone(),
    );

    app.clone()
        .oneshot(link_request("user@example.com"))
        .await
        .unwrap();
    let token = sender.last_token();

    let response = app.clone().oneshot(complete_request(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A replay of the consumed token is rejected
    let response = app.clone().oneshot(complete_request(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
