mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use common::{MockServer, TestApp, USER_KEY, authed, fast_notifier};
use recovery_payments_server::gateway::GatewayDispatcher;
use recovery_payments_server::models::webhook::{
    CreateWebhookRequest, UpdateWebhookRequest, WebhookEvent, WebhookSubscriptionResponse,
};
use recovery_payments_server::services::webhook_service::{
    self, WebhookNotifier, verify_signature,
};
use recovery_payments_server::store::MemoryStore;

async fn subscription(
    store: &MemoryStore,
    owner: Uuid,
    url: &str,
    events: Vec<WebhookEvent>,
) -> WebhookSubscriptionResponse {
    webhook_service::create_subscription(
        store,
        owner,
        CreateWebhookRequest {
            url: url.to_string(),
            events,
        },
    )
    .await
    .expect("subscription")
}

#[tokio::test]
async fn exhausted_retries_log_every_attempt_and_count_one_failure() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let endpoint = MockServer::start(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "down"})).await;
    let sub = subscription(&store, owner, &endpoint.url, vec![WebhookEvent::PaymentApproved]).await;
    let notifier = WebhookNotifier::new(store.clone(), fast_notifier()).expect("notifier");

    let summary = notifier
        .notify(owner, WebhookEvent::PaymentApproved, json!({"amount_cents": 100}))
        .await;

    assert_eq!(summary.subscribers, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(endpoint.requests().len(), 3);

    let logs = store.delivery_logs().await;
    let mut attempts: Vec<_> = logs.iter().map(|l| l.attempt_number).collect();
    attempts.sort();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(logs.iter().all(|l| !l.succeeded && l.response_status_code == Some(500)));
    assert!(logs.iter().all(|l| l.event == "payment.approved"));

    let counters = store.subscription(sub.id).await.expect("subscription");
    assert_eq!(counters.total_sent, 1);
    assert_eq!(counters.total_failed, 1);
    assert_eq!(counters.total_succeeded, 0);
    assert!(counters.last_sent_at.is_some());
}

#[tokio::test]
async fn late_success_counts_as_one_success() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let endpoint = MockServer::failing_first(2, json!({"ok": true})).await;
    let sub = subscription(&store, owner, &endpoint.url, vec![WebhookEvent::PaymentApproved]).await;
    let notifier = WebhookNotifier::new(store.clone(), fast_notifier()).expect("notifier");

    let summary = notifier
        .notify(owner, WebhookEvent::PaymentApproved, json!({"amount_cents": 100}))
        .await;

    assert_eq!((summary.succeeded, summary.failed), (1, 0));
    assert_eq!(endpoint.requests().len(), 3);

    let mut logs = store.delivery_logs().await;
    logs.sort_by_key(|l| l.attempt_number);
    let outcomes: Vec<_> = logs
        .iter()
        .map(|l| (l.attempt_number, l.succeeded, l.response_status_code))
        .collect();
    assert_eq!(
        outcomes,
        vec![(1, false, Some(500)), (2, false, Some(500)), (3, true, Some(200))]
    );

    let counters = store.subscription(sub.id).await.expect("subscription");
    assert_eq!(counters.total_sent, 1);
    assert_eq!(counters.total_succeeded, 1);
    assert_eq!(counters.total_failed, 0);
}

#[tokio::test]
async fn delivered_body_is_signed_with_the_subscription_secret() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let endpoint = MockServer::start(StatusCode::OK, json!({"ok": true})).await;
    let sub = subscription(&store, owner, &endpoint.url, vec![WebhookEvent::AdActivated]).await;
    let secret = sub.secret.clone().expect("secret on creation");
    let notifier = WebhookNotifier::new(store.clone(), fast_notifier()).expect("notifier");

    let summary = notifier
        .notify(owner, WebhookEvent::AdActivated, json!({"ad_id": "a1"}))
        .await;
    assert_eq!(summary.succeeded, 1);

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.header("Content-Type"), Some("application/json"));
    assert_eq!(request.header("X-Webhook-Event"), Some("ad.activated"));

    let signature = request.header("X-Webhook-Signature").expect("signature");
    assert!(signature.starts_with("sha256="));
    assert!(verify_signature(&secret, &request.body, signature));
    let mut tampered = request.body.to_vec();
    tampered[0] ^= 0x01;
    assert!(!verify_signature(&secret, &tampered, signature));

    let body = request.json();
    assert_eq!(body["evento"], "ad.activated");
    assert_eq!(body["data"]["ad_id"], "a1");
    assert!(body["timestamp"].is_string());

    let logs = store.delivery_logs().await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].succeeded);
    assert_eq!(logs[0].payload, body);

    let counters = store.subscription(sub.id).await.expect("subscription");
    assert_eq!((counters.total_sent, counters.total_succeeded), (1, 1));
}

#[tokio::test]
async fn only_active_subscribers_of_the_event_receive_it() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let endpoint = MockServer::start(StatusCode::OK, json!({})).await;
    subscription(&store, owner, &endpoint.url, vec![WebhookEvent::PaymentFailed]).await;
    let paused = subscription(&store, owner, &endpoint.url, vec![WebhookEvent::PaymentApproved]).await;
    webhook_service::update_subscription(
        store.as_ref(),
        owner,
        paused.id,
        UpdateWebhookRequest {
            active: Some(false),
            ..Default::default()
        },
    )
    .await
    .expect("pause");
    // Another user's subscription never sees this owner's events.
    subscription(&store, Uuid::new_v4(), &endpoint.url, vec![WebhookEvent::PaymentApproved]).await;
    let notifier = WebhookNotifier::new(store.clone(), fast_notifier()).expect("notifier");

    let summary = notifier
        .notify(owner, WebhookEvent::PaymentApproved, json!({}))
        .await;

    assert_eq!(summary.subscribers, 0);
    assert!(endpoint.requests().is_empty());
    assert!(store.delivery_logs().await.is_empty());
}

#[tokio::test]
async fn webhook_management_api() {
    let app = TestApp::new(GatewayDispatcher::new()).await;
    let endpoint = MockServer::start(StatusCode::OK, json!({})).await;

    let (status, body) = app
        .send_json(authed(
            "POST",
            "/api/v1/webhooks",
            USER_KEY,
            Some(json!({ "url": "ftp://example.com/hook", "events": ["payment.approved"] })),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = app
        .send_json(authed(
            "POST",
            "/api/v1/webhooks",
            USER_KEY,
            Some(json!({ "url": endpoint.url, "events": ["payment.approved", "payment.approved"] })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["events"], json!(["payment.approved"]));
    assert_eq!(body["secret"].as_str().map(str::len), Some(64));
    let id = body["id"].as_str().expect("id").to_string();

    let (status, list) = app
        .send_json(authed("GET", "/api/v1/webhooks", USER_KEY, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(Vec::len), Some(1));
    assert!(list[0].get("secret").is_none());

    let (status, updated) = app
        .send_json(authed(
            "PATCH",
            &format!("/api/v1/webhooks/{id}"),
            USER_KEY,
            Some(json!({ "events": ["payment.failed", "ad.activated"] })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["events"], json!(["payment.failed", "ad.activated"]));

    let (status, result) = app
        .send_json(authed("POST", &format!("/api/v1/webhooks/{id}/test"), USER_KEY, None))
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["succeeded"], true);
    assert_eq!(result["status_code"], 200);
    assert_eq!(endpoint.requests().len(), 1);

    let (status, logs) = app
        .send_json(authed("GET", &format!("/api/v1/webhooks/{id}/deliveries"), USER_KEY, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs.as_array().map(Vec::len), Some(1));
    assert_eq!(logs[0]["attempt_number"], 1);

    let (status, _) = app
        .send_json(authed("GET", &format!("/api/v1/webhooks/{id}"), common::ADMIN_KEY, None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(authed("DELETE", &format!("/api/v1/webhooks/{id}"), USER_KEY, None))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .send_json(authed("GET", &format!("/api/v1/webhooks/{id}"), USER_KEY, None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.store.delivery_logs().await.is_empty());
}
