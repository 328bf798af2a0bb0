#![allow(dead_code)]

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Request, StatusCode, Uri, header},
    response::IntoResponse,
};
use http_body_util::BodyExt;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use recovery_payments_server::app;
use recovery_payments_server::gateway::GatewayDispatcher;
use recovery_payments_server::gateway::mpesa::MpesaConfig;
use recovery_payments_server::gateway::stripe::StripeClient;
use recovery_payments_server::middleware::auth::hash_api_key;
use recovery_payments_server::models::api_key::Role;
use recovery_payments_server::services::activation::ExpiryPolicy;
use recovery_payments_server::services::webhook_service::NotifierConfig;
use recovery_payments_server::state::{AppState, StateConfig};
use recovery_payments_server::store::{MemoryStore, Stores};

pub const USER_KEY: &str = "test-user-key";
pub const ADMIN_KEY: &str = "test-admin-key";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test";

/// One request captured by a [`MockServer`].
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    failures: usize,
    content_type: &'static str,
    response: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// Local HTTP endpoint answering every request with a fixed response.
pub struct MockServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockServer {
    pub async fn start(status: StatusCode, response: Value) -> Self {
        Self::start_raw(status, "application/json", response.to_string()).await
    }

    pub async fn start_raw(status: StatusCode, content_type: &'static str, response: String) -> Self {
        Self::spawn(status, 0, content_type, response).await
    }

    /// Answers the first `failures` requests with 500, then `response`.
    pub async fn failing_first(failures: usize, response: Value) -> Self {
        Self::spawn(StatusCode::OK, failures, "application/json", response.to_string()).await
    }

    async fn spawn(
        status: StatusCode,
        failures: usize,
        content_type: &'static str,
        response: String,
    ) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            status,
            failures,
            content_type,
            response,
            requests: requests.clone(),
        };
        let router = Router::new().fallback(record).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock server");
        });

        Self {
            url: format!("http://{addr}"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until at least `count` requests arrived, then return them all.
    pub async fn wait_for(&self, count: usize) -> Vec<Recorded> {
        for _ in 0..250 {
            let requests = self.requests();
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {count} requests, got {}",
            self.requests().len()
        );
    }
}

async fn record(
    State(state): State<MockState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let seen = {
        let mut requests = state.requests.lock().unwrap();
        requests.push(Recorded {
            path: uri.path().to_string(),
            headers,
            body,
        });
        requests.len()
    };
    let status = if seen <= state.failures {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        state.status
    };
    (
        status,
        [(header::CONTENT_TYPE, state.content_type)],
        state.response,
    )
}

/// PEM public key of a throwaway RSA key pair, generated once per test binary.
pub fn rsa_public_key_pem() -> String {
    static PEM: OnceLock<String> = OnceLock::new();
    PEM.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 1024).expect("generate key");
        RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .expect("encode key")
    })
    .clone()
}

pub fn mpesa_config(base_url: &str) -> MpesaConfig {
    MpesaConfig {
        api_key: "mpesa-api-key".into(),
        public_key: rsa_public_key_pem(),
        service_provider_code: "171717".into(),
        c2b_url: format!("{base_url}/c2b"),
        b2c_url: format!("{base_url}/b2c"),
        origin: "developer.mpesa.vm.co.mz".into(),
        timeout: Duration::from_secs(5),
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub user_id: Uuid,
    pub admin_id: Uuid,
}

impl TestApp {
    pub async fn new(dispatcher: GatewayDispatcher) -> Self {
        Self::with_stripe(dispatcher, None).await
    }

    pub async fn with_stripe(dispatcher: GatewayDispatcher, stripe: Option<StripeClient>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), Stores::from_backend(store), dispatcher, stripe).await
    }

    /// Serve `stores`, which may wrap `store`; keys are seeded into `store`.
    pub async fn with_stores(
        store: Arc<MemoryStore>,
        stores: Stores,
        dispatcher: GatewayDispatcher,
    ) -> Self {
        Self::build(store, stores, dispatcher, None).await
    }

    async fn build(
        store: Arc<MemoryStore>,
        stores: Stores,
        dispatcher: GatewayDispatcher,
        stripe: Option<StripeClient>,
    ) -> Self {
        let user = store
            .insert_api_key(hash_api_key(USER_KEY), Uuid::new_v4(), Role::User)
            .await;
        let admin = store
            .insert_api_key(hash_api_key(ADMIN_KEY), Uuid::new_v4(), Role::Admin)
            .await;

        let state = AppState::new(
            stores,
            StateConfig {
                dispatcher,
                stripe,
                stripe_webhook_secret: Some(STRIPE_WEBHOOK_SECRET.to_string()),
                notifier: fast_notifier(),
                expiry: ExpiryPolicy::default(),
                push: None,
                delivery_log_retention: chrono::Duration::days(90),
            },
        )
        .expect("state");

        Self {
            router: app::router(state.clone()),
            state,
            store,
            user_id: user.user_id,
            admin_id: admin.user_id,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, body)
    }

    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("JSON response")
        };
        (status, json)
    }
}

/// Three attempts with millisecond backoff so retry tests stay fast.
pub fn fast_notifier() -> NotifierConfig {
    NotifierConfig {
        max_attempts: 3,
        backoff_base: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
    }
}

pub fn authed(method: &str, uri: &str, key: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {key}"));
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub fn public_post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", content_type)
        .body(body.into())
        .expect("request")
}
