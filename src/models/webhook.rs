//! Outbound webhook models: subscriptions, delivery logs and the event envelope.
//!
//! # Webhook Flow
//!
//! 1. A user registers an endpoint via `POST /api/v1/webhooks`, choosing events
//! 2. The system generates a signing secret, shown only in that response
//! 3. When a payment event occurs, the system POSTs a signed envelope
//! 4. The receiver verifies `X-Webhook-Signature` with the secret
//!
//! # Security
//!
//! - Secrets are only shown once during registration and cannot be rotated
//!   through updates
//! - Payloads are signed using HMAC-SHA256 over the exact bytes sent

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::UnknownVariant;

/// Events a subscription can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "payment.approved")]
    PaymentApproved,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "payment.pending")]
    PaymentPending,
    #[serde(rename = "subscription.activated")]
    SubscriptionActivated,
    #[serde(rename = "ad.activated")]
    AdActivated,
}

impl WebhookEvent {
    pub const ALL: [WebhookEvent; 5] = [
        WebhookEvent::PaymentApproved,
        WebhookEvent::PaymentFailed,
        WebhookEvent::PaymentPending,
        WebhookEvent::SubscriptionActivated,
        WebhookEvent::AdActivated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::PaymentApproved => "payment.approved",
            WebhookEvent::PaymentFailed => "payment.failed",
            WebhookEvent::PaymentPending => "payment.pending",
            WebhookEvent::SubscriptionActivated => "subscription.activated",
            WebhookEvent::AdActivated => "ad.activated",
        }
    }
}

impl std::fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookEvent {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        WebhookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == value)
            .ok_or_else(|| UnknownVariant::new("webhook event", value))
    }
}

/// Webhook subscription owned by a platform user.
///
/// The `signing_secret` is stored in plaintext (required for HMAC generation)
/// but never returned after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub target_url: String,
    pub events: Vec<WebhookEvent>,
    #[serde(skip)]
    pub signing_secret: String,
    pub active: bool,
    pub total_sent: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn listens_to(&self, event: WebhookEvent) -> bool {
        self.active && self.events.contains(&event)
    }
}

/// Row shape of the `webhook_subscriptions` table.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookSubscriptionRow {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub target_url: String,
    pub events: Vec<String>,
    pub signing_secret: String,
    pub active: bool,
    pub total_sent: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WebhookSubscriptionRow> for WebhookSubscription {
    type Error = UnknownVariant;

    fn try_from(row: WebhookSubscriptionRow) -> Result<Self, Self::Error> {
        let events = row
            .events
            .iter()
            .map(|event| event.parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: row.id,
            owner_user_id: row.owner_user_id,
            target_url: row.target_url,
            events,
            signing_secret: row.signing_secret,
            active: row.active,
            total_sent: row.total_sent,
            total_succeeded: row.total_succeeded,
            total_failed: row.total_failed,
            last_sent_at: row.last_sent_at,
            created_at: row.created_at,
        })
    }
}

/// Values for inserting a new subscription.
#[derive(Debug, Clone)]
pub struct NewWebhookSubscription {
    pub owner_user_id: Uuid,
    pub target_url: String,
    pub events: Vec<WebhookEvent>,
    pub signing_secret: String,
}

/// Request to register a new webhook subscription.
///
/// # Example
///
/// ```json
/// {
///   "url": "https://example.com/webhook",
///   "events": ["payment.approved", "ad.activated"]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<WebhookEvent>,
}

/// Owner-editable fields. The signing secret is deliberately absent.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub events: Option<Vec<WebhookEvent>>,
    pub active: Option<bool>,
}

/// Response when registering or retrieving a webhook subscription.
///
/// The `secret` field is ONLY included when creating a new subscription.
///
/// # Example (Create Response)
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "url": "https://example.com/webhook",
///   "events": ["payment.approved"],
///   "secret": "a1b2c3d4e5f6...",
///   "active": true,
///   "total_sent": 0,
///   "total_succeeded": 0,
///   "total_failed": 0,
///   "last_sent_at": null,
///   "created_at": "2025-01-15T10:30:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct WebhookSubscriptionResponse {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<WebhookEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub active: bool,
    pub total_sent: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookSubscription> for WebhookSubscriptionResponse {
    fn from(subscription: WebhookSubscription) -> Self {
        Self {
            id: subscription.id,
            url: subscription.target_url,
            events: subscription.events,
            secret: None,
            active: subscription.active,
            total_sent: subscription.total_sent,
            total_succeeded: subscription.total_succeeded,
            total_failed: subscription.total_failed,
            last_sent_at: subscription.last_sent_at,
            created_at: subscription.created_at,
        }
    }
}

impl WebhookSubscriptionResponse {
    /// Create response with secret included (only for registration).
    pub fn with_secret(mut self, secret: String) -> Self {
        self.secret = Some(secret);
        self
    }
}

/// One delivery attempt, as stored in `webhook_delivery_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct DeliveryLog {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub owner_user_id: Uuid,
    pub event: String,
    pub target_url: String,
    pub payload: serde_json::Value,
    pub attempt_number: i32,
    pub response_status_code: Option<i32>,
    pub response_body_excerpt: Option<String>,
    pub succeeded: bool,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeliveryLog {
    pub subscription_id: Uuid,
    pub owner_user_id: Uuid,
    pub event: WebhookEvent,
    pub target_url: String,
    pub payload: serde_json::Value,
    pub attempt_number: i32,
    pub response_status_code: Option<i32>,
    pub response_body_excerpt: Option<String>,
    pub succeeded: bool,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
}

/// Body POSTed to subscribers.
///
/// # Example
///
/// ```json
/// {
///   "evento": "payment.approved",
///   "timestamp": "2025-01-15T10:30:00Z",
///   "data": { "transaction_reference": "MP1734690000123K7QZ4", "amount_cents": 10000 }
/// }
/// ```
///
/// # Signature Verification
///
/// The request includes an `X-Webhook-Signature` header with format
/// `sha256=<hex_encoded_hmac>`, computed as HMAC-SHA256(secret, body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub evento: WebhookEvent,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookEnvelope {
    pub fn new(event: WebhookEvent, data: serde_json::Value) -> Self {
        Self {
            evento: event,
            timestamp: Utc::now(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_format() {
        for event in WebhookEvent::ALL {
            let json = serde_json::to_value(event).expect("serialize");
            assert_eq!(json, event.as_str());
            assert_eq!(event.as_str().parse::<WebhookEvent>(), Ok(event));
        }
        assert!("payment.refunded".parse::<WebhookEvent>().is_err());
    }

    #[test]
    fn envelope_uses_evento_key() {
        let envelope = WebhookEnvelope::new(WebhookEvent::AdActivated, serde_json::json!({"x": 1}));
        let json = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(json["evento"], "ad.activated");
        assert_eq!(json["data"]["x"], 1);
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn inactive_subscription_listens_to_nothing() {
        let mut subscription = WebhookSubscription {
            id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            target_url: "https://example.com/hook".into(),
            events: vec![WebhookEvent::PaymentApproved],
            signing_secret: "s".into(),
            active: true,
            total_sent: 0,
            total_succeeded: 0,
            total_failed: 0,
            last_sent_at: None,
            created_at: Utc::now(),
        };
        assert!(subscription.listens_to(WebhookEvent::PaymentApproved));
        assert!(!subscription.listens_to(WebhookEvent::PaymentFailed));
        subscription.active = false;
        assert!(!subscription.listens_to(WebhookEvent::PaymentApproved));
    }
}
