//! Webhook service for managing subscriptions and delivering events.
//!
//! This module handles subscription registration, signed event delivery with
//! retry, per-attempt delivery logs, and HMAC signature generation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::webhook::{
    CreateWebhookRequest, DeliveryLog, NewDeliveryLog, NewWebhookSubscription,
    UpdateWebhookRequest, WebhookEnvelope, WebhookEvent, WebhookSubscription,
    WebhookSubscriptionResponse,
};
use crate::store::{SubscriptionChanges, WebhookStore};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// Longest response body excerpt kept in a delivery log.
pub const RESPONSE_EXCERPT_CHARS: usize = 500;

/// Register a new webhook subscription.
///
/// # Process
///
/// 1. Validate URL format and event list
/// 2. Generate cryptographically secure secret (32 bytes)
/// 3. Store subscription
/// 4. Return subscription with secret (only shown once)
pub async fn create_subscription(
    store: &dyn WebhookStore,
    owner: Uuid,
    request: CreateWebhookRequest,
) -> Result<WebhookSubscriptionResponse, AppError> {
    validate_webhook_url(&request.url)?;
    let events = validate_events(request.events)?;

    let secret = generate_secret();
    let subscription = store
        .create_subscription(NewWebhookSubscription {
            owner_user_id: owner,
            target_url: request.url,
            events,
            signing_secret: secret.clone(),
        })
        .await?;
    info!(subscription_id = %subscription.id, %owner, "webhook subscription created");

    Ok(WebhookSubscriptionResponse::from(subscription).with_secret(secret))
}

/// List the owner's subscriptions, active or not. Secrets are never included.
pub async fn list_subscriptions(
    store: &dyn WebhookStore,
    owner: Uuid,
) -> Result<Vec<WebhookSubscriptionResponse>, AppError> {
    let subscriptions = store.list_subscriptions(owner).await?;
    Ok(subscriptions.into_iter().map(Into::into).collect())
}

pub async fn get_subscription(
    store: &dyn WebhookStore,
    owner: Uuid,
    id: Uuid,
) -> Result<WebhookSubscription, AppError> {
    store
        .find_subscription(owner, id)
        .await?
        .ok_or(AppError::WebhookNotFound)
}

/// Apply owner edits. The signing secret cannot be changed here.
pub async fn update_subscription(
    store: &dyn WebhookStore,
    owner: Uuid,
    id: Uuid,
    request: UpdateWebhookRequest,
) -> Result<WebhookSubscriptionResponse, AppError> {
    if let Some(url) = &request.url {
        validate_webhook_url(url)?;
    }
    let events = request.events.map(validate_events).transpose()?;

    let updated = store
        .update_subscription(
            owner,
            id,
            SubscriptionChanges {
                target_url: request.url,
                events,
                active: request.active,
            },
        )
        .await?
        .ok_or(AppError::WebhookNotFound)?;

    Ok(updated.into())
}

/// Delete a subscription together with its delivery history.
///
/// # Security
///
/// - Verifies ownership; another user's id is reported as not found
pub async fn delete_subscription(
    store: &dyn WebhookStore,
    owner: Uuid,
    id: Uuid,
) -> Result<(), AppError> {
    if !store.delete_subscription(owner, id).await? {
        return Err(AppError::WebhookNotFound);
    }
    info!(subscription_id = %id, %owner, "webhook subscription deleted");
    Ok(())
}

/// Delivery logs of one subscription within the retention window.
pub async fn list_deliveries(
    store: &dyn WebhookStore,
    owner: Uuid,
    id: Uuid,
    retention: chrono::Duration,
) -> Result<Vec<DeliveryLog>, AppError> {
    // Ownership check first so foreign ids are a 404 rather than an empty list.
    get_subscription(store, owner, id).await?;
    Ok(store
        .list_delivery_logs(owner, id, Utc::now() - retention)
        .await?)
}

/// Delivery tuning. Waits between attempts grow as `backoff_base * 2^attempt`.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

impl NotifierConfig {
    /// Wait after the failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }
}

/// Aggregate result of one `notify` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotifySummary {
    pub subscribers: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Result of a single HTTP attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub succeeded: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: i64,
    pub error: Option<String>,
    #[serde(skip)]
    pub body_excerpt: Option<String>,
}

/// Delivers signed platform events to the subscriptions of a user.
///
/// Delivery never fails the caller: transport errors are retried, logged and
/// finally dropped, and store errors are logged.
#[derive(Clone)]
pub struct WebhookNotifier {
    store: Arc<dyn WebhookStore>,
    http: reqwest::Client,
    config: NotifierConfig,
}

impl WebhookNotifier {
    pub fn new(store: Arc<dyn WebhookStore>, config: NotifierConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            store,
            http,
            config,
        })
    }

    /// Send `event` to every active subscription of `owner` listening to it.
    ///
    /// # Process
    ///
    /// 1. Load matching subscriptions (none is not an error)
    /// 2. Serialize the envelope once; those exact bytes are signed and sent
    /// 3. Deliver to all subscriptions concurrently, each with retries
    /// 4. Update each subscription's counters once per call
    pub async fn notify(&self, owner: Uuid, event: WebhookEvent, data: JsonValue) -> NotifySummary {
        let subscriptions = match self.store.active_subscriptions_for(owner, event).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!(%owner, %event, error = %e, "failed to load webhook subscriptions");
                return NotifySummary::default();
            }
        };
        if subscriptions.is_empty() {
            return NotifySummary::default();
        }

        let envelope = WebhookEnvelope::new(event, data);
        let (body, snapshot) = match (serde_json::to_vec(&envelope), serde_json::to_value(&envelope)) {
            (Ok(body), Ok(snapshot)) => (body, snapshot),
            (Err(e), _) | (_, Err(e)) => {
                warn!(%event, error = %e, "failed to serialize webhook envelope");
                return NotifySummary::default();
            }
        };

        let results = join_all(
            subscriptions
                .iter()
                .map(|subscription| self.deliver(subscription, event, &body, &snapshot)),
        )
        .await;

        let succeeded = results.iter().filter(|ok| **ok).count();
        let summary = NotifySummary {
            subscribers: results.len(),
            succeeded,
            failed: results.len() - succeeded,
        };
        info!(%owner, %event, ?summary, "webhook notification finished");
        summary
    }

    /// Deliver to one subscription with retries, logging every attempt.
    async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        event: WebhookEvent,
        body: &[u8],
        snapshot: &JsonValue,
    ) -> bool {
        let signature = sign_payload(&subscription.signing_secret, body);
        let mut succeeded = false;

        for attempt in 1..=self.config.max_attempts {
            let result = self
                .attempt(&subscription.target_url, event, body, &signature)
                .await;
            self.log_attempt(subscription, event, snapshot, attempt, &result)
                .await;

            if result.succeeded {
                succeeded = true;
                break;
            }
            warn!(
                subscription_id = %subscription.id,
                attempt,
                status = result.status_code,
                error = result.error.as_deref().unwrap_or(""),
                "webhook delivery attempt failed"
            );
            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.backoff_after(attempt)).await;
            }
        }

        if let Err(e) = self
            .store
            .record_delivery_outcome(subscription.id, succeeded, Utc::now())
            .await
        {
            warn!(subscription_id = %subscription.id, error = %e, "failed to update webhook counters");
        }
        succeeded
    }

    async fn attempt(
        &self,
        url: &str,
        event: WebhookEvent,
        body: &[u8],
        signature: &str,
    ) -> AttemptResult {
        let started = Instant::now();
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, event.as_str())
            .body(body.to_vec())
            .send()
            .await;
        let elapsed = || i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match response {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                AttemptResult {
                    succeeded: status.is_success(),
                    status_code: Some(status.as_u16()),
                    response_time_ms: elapsed(),
                    error: (!status.is_success()).then(|| format!("HTTP {}", status.as_u16())),
                    body_excerpt: Some(truncate_chars(&text, RESPONSE_EXCERPT_CHARS)),
                }
            }
            Err(e) => AttemptResult {
                succeeded: false,
                status_code: None,
                response_time_ms: elapsed(),
                error: Some(format!("Request failed: {e}")),
                body_excerpt: None,
            },
        }
    }

    async fn log_attempt(
        &self,
        subscription: &WebhookSubscription,
        event: WebhookEvent,
        snapshot: &JsonValue,
        attempt: u32,
        result: &AttemptResult,
    ) {
        let log = NewDeliveryLog {
            subscription_id: subscription.id,
            owner_user_id: subscription.owner_user_id,
            event,
            target_url: subscription.target_url.clone(),
            payload: snapshot.clone(),
            attempt_number: i32::try_from(attempt).unwrap_or(i32::MAX),
            response_status_code: result.status_code.map(i32::from),
            response_body_excerpt: result.body_excerpt.clone(),
            succeeded: result.succeeded,
            error_message: result.error.clone(),
            response_time_ms: Some(result.response_time_ms),
        };
        if let Err(e) = self.store.append_delivery_log(log).await {
            warn!(subscription_id = %subscription.id, attempt, error = %e, "failed to write delivery log");
        }
    }

    /// Send one signed test event to a subscription, without retries.
    ///
    /// The attempt is logged and counted like any other delivery.
    pub async fn send_test_event(&self, subscription: &WebhookSubscription) -> AttemptResult {
        let event = subscription
            .events
            .first()
            .copied()
            .unwrap_or(WebhookEvent::PaymentApproved);
        let envelope = WebhookEnvelope::new(
            event,
            serde_json::json!({ "test": true, "subscription_id": subscription.id }),
        );
        let snapshot = serde_json::to_value(&envelope).unwrap_or_default();
        let body = serde_json::to_vec(&snapshot).unwrap_or_default();
        let signature = sign_payload(&subscription.signing_secret, &body);

        let result = self
            .attempt(&subscription.target_url, event, &body, &signature)
            .await;
        self.log_attempt(subscription, event, &snapshot, 1, &result)
            .await;
        if let Err(e) = self
            .store
            .record_delivery_outcome(subscription.id, result.succeeded, Utc::now())
            .await
        {
            warn!(subscription_id = %subscription.id, error = %e, "failed to update webhook counters");
        }
        result
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Generate the `X-Webhook-Signature` value for a payload.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
///
/// # Verification
///
/// Receivers should:
/// 1. Extract signature from `X-Webhook-Signature` header
/// 2. Compute HMAC-SHA256(secret, request_body)
/// 3. Compare using constant-time comparison
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"));
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Check a `sha256=<hex>` header against the payload in constant time.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let expected = sign_payload(secret, payload);
    expected.as_bytes().ct_eq(header.trim().as_bytes()).into()
}

/// Generate cryptographically secure random secret.
///
/// # Output
///
/// 64 hex characters (32 random bytes)
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// Validate webhook URL format.
///
/// # Rules
///
/// - Must be a valid absolute URL with a host
/// - Scheme must be `http` or `https`
/// - Maximum 2048 characters
pub fn validate_webhook_url(url: &str) -> Result<(), AppError> {
    if url.len() > 2048 {
        return Err(AppError::InvalidWebhookUrl(
            "URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| AppError::InvalidWebhookUrl("Invalid URL format".to_string()))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        "http" | "https" => Err(AppError::InvalidWebhookUrl("URL has no host".to_string())),
        _ => Err(AppError::InvalidWebhookUrl(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}

/// Require at least one event and drop duplicates, keeping request order.
fn validate_events(events: Vec<WebhookEvent>) -> Result<Vec<WebhookEvent>, AppError> {
    if events.is_empty() {
        return Err(AppError::validation(
            "events",
            "at least one event is required",
        ));
    }
    let mut seen = HashSet::new();
    Ok(events.into_iter().filter(|e| seen.insert(*e)).collect())
}

/// Cut-off for delivery logs: rows created before it are purged.
pub fn retention_cutoff(retention: chrono::Duration) -> DateTime<Utc> {
    Utc::now() - retention
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip_and_tamper_detection() {
        let secret = generate_secret();
        let body = br#"{"evento":"payment.approved","data":{"amount_cents":100}}"#;
        let header = sign_payload(&secret, body);

        assert!(header.starts_with("sha256="));
        assert_eq!(header.len(), "sha256=".len() + 64);
        assert!(verify_signature(&secret, body, &header));

        let mut tampered = body.to_vec();
        tampered[10] ^= 0x01;
        assert!(!verify_signature(&secret, &tampered, &header));
        assert!(!verify_signature("other-secret", body, &header));
    }

    #[test]
    fn secrets_are_64_hex_chars_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn url_validation() {
        assert!(validate_webhook_url("https://example.com/hook").is_ok());
        assert!(validate_webhook_url("http://partner.example.com/hook").is_ok());
        assert!(validate_webhook_url("ftp://example.com/hook").is_err());
        assert!(validate_webhook_url("example.com/hook").is_err());
        assert!(validate_webhook_url(&format!("https://example.com/{}", "a".repeat(2048))).is_err());
    }

    #[test]
    fn events_are_required_and_deduplicated() {
        assert!(validate_events(vec![]).is_err());
        let events = validate_events(vec![
            WebhookEvent::PaymentApproved,
            WebhookEvent::AdActivated,
            WebhookEvent::PaymentApproved,
        ])
        .expect("valid");
        assert_eq!(events, vec![WebhookEvent::PaymentApproved, WebhookEvent::AdActivated]);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = NotifierConfig::default();
        assert_eq!(config.backoff_after(1), Duration::from_secs(2));
        assert_eq!(config.backoff_after(2), Duration::from_secs(4));
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let text = "é".repeat(600);
        let excerpt = truncate_chars(&text, RESPONSE_EXCERPT_CHARS);
        assert_eq!(excerpt.chars().count(), 500);
        assert_eq!(truncate_chars("short", 500), "short");
    }
}
