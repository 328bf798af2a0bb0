mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use uuid::Uuid;

use common::{
    MockServer, STRIPE_WEBHOOK_SECRET, TestApp, USER_KEY, authed, mpesa_config, public_post,
};
use recovery_payments_server::gateway::GatewayDispatcher;
use recovery_payments_server::gateway::emola::EmolaConfig;
use recovery_payments_server::gateway::stripe::{StripeClient, StripeConfig};
use recovery_payments_server::models::payment::{NewPaymentAttempt, PaymentAttempt, PaymentStatus};
use recovery_payments_server::store::{MemoryStore, PaymentStore, StoreError, StoreResult, Stores};

const EMOLA_ACCEPTED: &str = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><ns2:gwOperationResponse xmlns:ns2="http://webservice.bccsgw.viettel.com/"><Result><error>0</error><description>success</description><original>&lt;return&gt;&lt;errorCode&gt;0&lt;/errorCode&gt;&lt;/return&gt;</original></Result></ns2:gwOperationResponse></S:Body></S:Envelope>"#;

fn emola_callback_body(reference: &str, code: &str) -> String {
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Body><ns:callback xmlns:ns="http://callback.emola/"><refNo>{reference}</refNo><transId>TRX-77</transId><errorCode>{code}</errorCode></ns:callback></soapenv:Body></soapenv:Envelope>"#
    )
}

fn stripe_signature(body: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(STRIPE_WEBHOOK_SECRET.as_bytes()).expect("key");
    mac.update(format!("{timestamp}.{body}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

async fn emola_app() -> (MockServer, TestApp) {
    let provider = MockServer::start_raw(
        StatusCode::OK,
        "text/xml; charset=utf-8",
        EMOLA_ACCEPTED.to_string(),
    )
    .await;
    let config = EmolaConfig {
        url: format!("{}/gateway", provider.url),
        username: "partner".into(),
        password: "secret".into(),
        partner_code: "900100".into(),
        key: "k3y".into(),
        timeout: Duration::from_secs(5),
    };
    let dispatcher = GatewayDispatcher::from_config(None, Some(&config)).expect("dispatcher");
    (provider, TestApp::new(dispatcher).await)
}

#[tokio::test]
async fn emola_payment_settles_through_soap_callback() {
    let (provider, app) = emola_app().await;
    let listing = app.store.seed_talent_listing(app.user_id).await;

    let (status, body) = app
        .send_json(authed(
            "POST",
            "/api/v1/payments",
            USER_KEY,
            Some(json!({
                "method": "emola",
                "phone": "861234567",
                "amount_cents": 25000,
                "package_name": "annual",
                "target": { "kind": "talent_listing", "listing_id": listing }
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "pending");
    let reference = body["data"]["transaction_reference"]
        .as_str()
        .expect("reference")
        .to_string();
    assert!(reference.starts_with("EM"));

    let sent = provider.wait_for(1).await;
    let envelope = String::from_utf8_lossy(&sent[0].body).into_owned();
    assert!(envelope.contains("<wscode>pushUssdMessage</wscode>"));
    assert!(envelope.contains(r#"<param name="msisdn" value="861234567"/>"#));
    assert!(envelope.contains(r#"<param name="transAmount" value="250.00"/>"#));
    assert!(envelope.contains(&format!(r#"<param name="refNo" value="{reference}"/>"#)));

    let (status, ack) = app
        .send(public_post(
            "/callbacks/emola",
            "text/xml",
            emola_callback_body(&reference, "0"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let ack = String::from_utf8_lossy(&ack).into_owned();
    assert!(ack.contains("<errorCode>0</errorCode>"));
    assert!(ack.contains("<transId>TRX-77</transId>"));

    let payment = app.store.payments().await.pop().expect("payment");
    assert_eq!(payment.status, PaymentStatus::Approved);
    let listing = app.store.talent_listing(listing).await.expect("listing");
    assert_eq!(listing.status, "active");
    let days = (listing.expires_at.expect("expiry") - Utc::now()).num_days();
    assert!((364..=365).contains(&days), "expiry in {days} days");
}

#[tokio::test]
async fn emola_ack_is_sent_even_for_unreadable_callbacks() {
    let (_provider, app) = emola_app().await;

    let (status, ack) = app
        .send(public_post("/callbacks/emola", "text/xml", "<broken><xml>"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&ack).contains("<errorCode>1</errorCode>"));
}

#[tokio::test]
async fn mpesa_garbage_is_acknowledged() {
    let app = TestApp::new(GatewayDispatcher::new()).await;

    let (status, body) = app
        .send_json(public_post("/callbacks/mpesa", "application/json", "not json"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

async fn card_app() -> (MockServer, TestApp) {
    let stripe_api = MockServer::start(
        StatusCode::OK,
        json!({
            "id": "pi_123",
            "status": "requires_payment_method",
            "client_secret": "pi_123_secret_abc"
        }),
    )
    .await;
    let client = StripeClient::new(&StripeConfig {
        api_base: stripe_api.url.clone(),
        secret_key: "sk_test_123".into(),
        webhook_secret: STRIPE_WEBHOOK_SECRET.into(),
        currency: "MZN".into(),
        timeout: Duration::from_secs(5),
    })
    .expect("stripe client");
    (
        stripe_api,
        TestApp::with_stripe(GatewayDispatcher::new(), Some(client)).await,
    )
}

#[tokio::test]
async fn card_payment_waits_for_signed_stripe_event() {
    let (stripe_api, app) = card_app().await;

    let (status, body) = app
        .send_json(authed(
            "POST",
            "/api/v1/payments",
            USER_KEY,
            Some(json!({
                "method": "card",
                "amount_cents": 99900,
                "package_name": "monthly",
                "target": { "kind": "subscription" },
                "card": { "brand": "visa", "last4": "4242" }
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["client_secret"], "pi_123_secret_abc");
    assert_eq!(body["data"]["card_details"]["last4"], "4242");
    let reference = body["data"]["transaction_reference"]
        .as_str()
        .expect("reference")
        .to_string();

    let intent_request = stripe_api.wait_for(1).await;
    assert_eq!(intent_request[0].path, "/v1/payment_intents");
    assert!(intent_request[0]
        .header("Authorization")
        .expect("auth")
        .starts_with("Basic "));
    let stored = app.store.payments().await.pop().expect("payment");
    assert!(stored.provider_response.get("client_secret").is_none());
    assert_eq!(stored.provider_reference.as_deref(), Some("pi_123"));

    let event = json!({
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_123", "status": "succeeded", "metadata": { "reference": reference } } }
    })
    .to_string();

    let mut forged = public_post("/callbacks/stripe", "application/json", event.clone());
    forged
        .headers_mut()
        .insert("Stripe-Signature", "t=1,v1=deadbeef".parse().expect("header"));
    let (status, _) = app.send(forged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        app.store.payments().await.pop().expect("payment").status,
        PaymentStatus::Pending
    );

    let mut signed = public_post("/callbacks/stripe", "application/json", event.clone());
    signed.headers_mut().insert(
        "Stripe-Signature",
        stripe_signature(&event, Utc::now().timestamp())
            .parse()
            .expect("header"),
    );
    let (status, _) = app.send(signed).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        app.store.payments().await.pop().expect("payment").status,
        PaymentStatus::Approved
    );
    let plan = app.store.plan(app.user_id).await.expect("plan");
    assert_eq!(plan.plan, "monthly");
}

#[tokio::test]
async fn card_payments_need_stripe() {
    let app = TestApp::new(GatewayDispatcher::new()).await;

    let (status, body) = app
        .send_json(authed(
            "POST",
            "/api/v1/payments",
            USER_KEY,
            Some(json!({ "method": "card", "amount_cents": 500, "package_name": "boost" })),
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], "method");
}

#[tokio::test]
async fn health_lists_registered_rails() {
    let (_provider, app) = emola_app().await;

    let (status, body) = app
        .send_json(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .expect("request"),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rails"], json!(["emola/c2b", "emola/b2c"]));
}

/// Payment store whose status updates always fail.
struct UnwritableStatus(Arc<MemoryStore>);

#[async_trait]
impl PaymentStore for UnwritableStatus {
    async fn insert_payment(&self, payment: NewPaymentAttempt) -> StoreResult<PaymentAttempt> {
        self.0.insert_payment(payment).await
    }

    async fn find_payment(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<PaymentAttempt>> {
        self.0.find_payment(owner, id).await
    }

    async fn list_payments(&self, owner: Uuid, limit: i64) -> StoreResult<Vec<PaymentAttempt>> {
        self.0.list_payments(owner, limit).await
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<PaymentAttempt>> {
        self.0.find_by_reference(reference).await
    }

    async fn complete_pending(
        &self,
        _id: Uuid,
        _status: PaymentStatus,
        _callback: Value,
        _paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PaymentAttempt>> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.0.ping().await
    }
}

#[tokio::test]
async fn store_failures_during_reconciliation_are_still_acknowledged() {
    let provider = MockServer::start(
        StatusCode::OK,
        json!({
            "output_ResponseCode": "INS-0",
            "output_ResponseDesc": "Request processed successfully",
            "output_TransactionID": "TX0001",
        }),
    )
    .await;
    let dispatcher =
        GatewayDispatcher::from_config(Some(&mpesa_config(&provider.url)), None).expect("dispatcher");
    let store = Arc::new(MemoryStore::new());
    let mut stores = Stores::from_backend(store.clone());
    stores.payments = Arc::new(UnwritableStatus(store.clone()));
    let app = TestApp::with_stores(store, stores, dispatcher).await;

    let (status, body) = app
        .send_json(authed(
            "POST",
            "/api/v1/payments",
            USER_KEY,
            Some(json!({
                "method": "mpesa",
                "phone": "841234567",
                "amount_cents": 10000,
                "package_name": "featured-ad"
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let reference = body["data"]["transaction_reference"]
        .as_str()
        .expect("reference")
        .to_string();

    let (status, ack) = app
        .send_json(public_post(
            "/callbacks/mpesa",
            "application/json",
            json!({
                "output_ThirdPartyReference": reference,
                "output_TransactionID": "TX0001",
                "output_ResponseCode": "INS-0",
            })
            .to_string(),
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({ "status": "ok" }));
    assert_eq!(
        app.store.payments().await.pop().expect("payment").status,
        PaymentStatus::Pending
    );
}
