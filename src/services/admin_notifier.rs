//! Admin notification fan-out: web push to admin browsers plus a real-time
//! broadcast to connected admin sessions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder,
};

use crate::models::push::PushSubscription;
use crate::store::PushSubscriptionStore;

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Event delivered to admin sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminEvent {
    pub event: String,
    pub payload: JsonValue,
    pub at: DateTime<Utc>,
}

/// Real-time channel to connected admin sessions.
pub trait Broadcaster: Send + Sync {
    fn emit(&self, event: &str, payload: &JsonValue);
}

/// Broadcaster backed by a tokio broadcast channel; every SSE connection
/// holds one receiver.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<AdminEvent>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdminEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn emit(&self, event: &str, payload: &JsonValue) {
        let message = AdminEvent {
            event: event.to_string(),
            payload: payload.clone(),
            at: Utc::now(),
        };
        // Err only means nobody is listening.
        if self.tx.send(message).is_err() {
            debug!(event, "no admin sessions connected");
        }
    }
}

pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn emit(&self, _event: &str, _payload: &JsonValue) {}
}

#[derive(Debug, Error)]
pub enum PushError {
    /// The push service no longer knows this endpoint; drop the subscription.
    #[error("push subscription is gone")]
    Gone,

    #[error("push delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait PushService: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &[u8]) -> Result<(), PushError>;
}

/// Web push signed with a VAPID key.
pub struct VapidPushService {
    private_key_pem: String,
    subject: String,
    client: IsahcWebPushClient,
}

impl VapidPushService {
    pub fn new(private_key_pem: String, subject: String) -> Result<Self, PushError> {
        let client = IsahcWebPushClient::new().map_err(|e| PushError::Delivery(e.to_string()))?;
        Ok(Self {
            private_key_pem,
            subject,
            client,
        })
    }
}

#[async_trait]
impl PushService for VapidPushService {
    async fn send(&self, subscription: &PushSubscription, payload: &[u8]) -> Result<(), PushError> {
        let info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.p256dh,
            &subscription.auth,
        );

        let mut signature = VapidSignatureBuilder::from_pem(self.private_key_pem.as_bytes(), &info)
            .map_err(|e| PushError::Delivery(e.to_string()))?;
        signature.add_claim("sub", self.subject.as_str());
        let signature = signature
            .build()
            .map_err(|e| PushError::Delivery(e.to_string()))?;

        let mut message = WebPushMessageBuilder::new(&info);
        message.set_payload(ContentEncoding::Aes128Gcm, payload);
        message.set_vapid_signature(signature);
        let message = message
            .build()
            .map_err(|e| PushError::Delivery(e.to_string()))?;

        self.client.send(message).await.map_err(|e| match e {
            WebPushError::EndpointNotValid { .. } | WebPushError::EndpointNotFound { .. } => {
                PushError::Gone
            }
            other => PushError::Delivery(other.to_string()),
        })
    }
}

/// Fans admin notifications out to push subscriptions and the broadcaster.
///
/// Fire-and-forget: failures are logged, never returned.
#[derive(Clone)]
pub struct AdminNotifier {
    store: Arc<dyn PushSubscriptionStore>,
    push: Option<Arc<dyn PushService>>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl AdminNotifier {
    pub fn new(
        store: Arc<dyn PushSubscriptionStore>,
        push: Option<Arc<dyn PushService>>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            push,
            broadcaster,
        }
    }

    pub async fn notify_admins(&self, event: &str, title: &str, body: &str, data: JsonValue) {
        let payload = json!({ "title": title, "body": body, "data": data });
        self.broadcaster.emit(event, &payload);

        let Some(push) = &self.push else {
            return;
        };
        let subscriptions = match self.store.admin_push_subscriptions().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!(event, error = %e, "failed to load admin push subscriptions");
                return;
            }
        };
        if subscriptions.is_empty() {
            return;
        }

        let bytes = payload.to_string().into_bytes();
        let results = join_all(subscriptions.iter().map(|s| push.send(s, &bytes))).await;

        let mut delivered = 0;
        for (subscription, result) in subscriptions.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(PushError::Gone) => {
                    info!(endpoint = %subscription.endpoint, "removing expired push subscription");
                    if let Err(e) = self.store.delete_push_subscription(&subscription.endpoint).await {
                        warn!(endpoint = %subscription.endpoint, error = %e, "failed to remove push subscription");
                    }
                }
                Err(e) => {
                    warn!(endpoint = %subscription.endpoint, error = %e, "admin push failed");
                }
            }
        }
        info!(event, delivered, total = subscriptions.len(), "admin push fan-out finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct ScriptedPush {
        gone_endpoint: String,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushService for ScriptedPush {
        async fn send(&self, subscription: &PushSubscription, _payload: &[u8]) -> Result<(), PushError> {
            self.sent.lock().unwrap().push(subscription.endpoint.clone());
            if subscription.endpoint == self.gone_endpoint {
                Err(PushError::Gone)
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let broadcaster = ChannelBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.emit("payment.approved", &json!({"amount_cents": 100}));

        let event = rx.recv().await.expect("event");
        assert_eq!(event.event, "payment.approved");
        assert_eq!(event.payload["amount_cents"], 100);
    }

    #[tokio::test]
    async fn gone_subscriptions_are_removed() {
        let store = Arc::new(MemoryStore::new());
        let admin = Uuid::new_v4();
        store
            .upsert_push_subscription(admin, "admin", "https://push.example/live", "k", "a")
            .await
            .expect("insert");
        store
            .upsert_push_subscription(admin, "admin", "https://push.example/gone", "k", "a")
            .await
            .expect("insert");
        store
            .upsert_push_subscription(Uuid::new_v4(), "user", "https://push.example/user", "k", "a")
            .await
            .expect("insert");

        let push = Arc::new(ScriptedPush {
            gone_endpoint: "https://push.example/gone".into(),
            sent: Mutex::new(Vec::new()),
        });
        let notifier = AdminNotifier::new(store.clone(), Some(push.clone()), Arc::new(NoopBroadcaster));
        notifier
            .notify_admins("payment.approved", "Payment approved", "100.00 MZN", json!({}))
            .await;

        let mut sent = push.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["https://push.example/gone", "https://push.example/live"]);

        let remaining: Vec<_> = store
            .push_subscriptions()
            .await
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        assert_eq!(remaining, vec!["https://push.example/live", "https://push.example/user"]);
    }
}
