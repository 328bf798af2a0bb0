//! Card payments through Stripe PaymentIntents.
//!
//! A card attempt is created pending with the intent's client secret; the
//! browser confirms the card and Stripe reports the result on the signed
//! `payment_intent.*` webhook.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use sha2::Sha256;
use tracing::{info, warn};

use super::auth::{BasicAuthenticator, ProviderAuthenticator};
use super::error::{GatewayError, GatewayResult};
use super::types::{CallbackStatus, ProviderCallback, ProviderOutcome, ProviderStatus};
use crate::models::payment::PaymentMethod;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub currency: String,
    pub timeout: Duration,
}

pub struct StripeClient {
    api_base: String,
    currency: String,
    authenticator: BasicAuthenticator,
    http: reqwest::Client,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to initialize HTTP client: {e}"),
            })?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            currency: config.currency.to_lowercase(),
            // Secret key as the username, empty password.
            authenticator: BasicAuthenticator::new(config.secret_key.clone(), ""),
            http,
        })
    }

    /// Create a PaymentIntent tagged with our transaction reference.
    ///
    /// Returns a pending outcome whose `provider_reference` is the intent id
    /// and whose `provider_data.client_secret` is handed to the browser.
    pub async fn create_payment_intent(
        &self,
        amount_cents: i64,
        reference: &str,
    ) -> GatewayResult<ProviderOutcome> {
        if amount_cents <= 0 {
            return Err(GatewayError::validation("amount", "amount must be greater than zero"));
        }
        let credential = self.authenticator.build_credential()?;
        let amount = amount_cents.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", self.currency.as_str()),
            ("metadata[reference]", reference),
            ("automatic_payment_methods[enabled]", "true"),
        ];

        let response = credential
            .apply(self.http.post(format!("{}/v1/payment_intents", self.api_base)))
            .form(&form)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                warn!(reference, error = %e, "Stripe request failed");
                return Ok(ProviderOutcome {
                    status: ProviderStatus::Error,
                    transaction_reference: reference.to_string(),
                    provider_reference: None,
                    provider_data: json!({ "message": e.to_string() }),
                });
            }
        };

        let http_status = response.status();
        let data: JsonValue = response.json().await.unwrap_or_else(|_| json!({}));
        if !http_status.is_success() {
            let message = data
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("payment intent rejected")
                .to_string();
            warn!(reference, status = http_status.as_u16(), %message, "Stripe rejected payment intent");
            return Ok(ProviderOutcome {
                status: ProviderStatus::Fail,
                transaction_reference: reference.to_string(),
                provider_reference: None,
                provider_data: json!({ "message": message, "http_status": http_status.as_u16() }),
            });
        }

        let intent_id = data.get("id").and_then(|v| v.as_str()).map(str::to_string);
        info!(reference, intent_id = intent_id.as_deref().unwrap_or("none"), "created payment intent");
        Ok(ProviderOutcome {
            status: ProviderStatus::Pending,
            transaction_reference: reference.to_string(),
            provider_reference: intent_id,
            provider_data: json!({
                "id": data.get("id"),
                "status": data.get("status"),
                "client_secret": data.get("client_secret"),
            }),
        })
    }
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=..]`) against
/// the raw request body.
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance_secs: i64,
) -> GatewayResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| GatewayError::SignatureVerification {
        message: "missing timestamp".to_string(),
    })?;
    if (Utc::now().timestamp() - timestamp).abs() > tolerance_secs {
        return Err(GatewayError::SignatureVerification {
            message: "timestamp outside tolerance".to_string(),
        });
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
            GatewayError::SignatureVerification {
                message: format!("invalid secret: {e}"),
            }
        })?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(GatewayError::SignatureVerification {
        message: "no matching v1 signature".to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: JsonValue,
}

/// Reduce a verified Stripe event to a callback.
///
/// `Ok(None)` for event types that do not settle a payment.
pub fn parse_event(body: &[u8]) -> GatewayResult<Option<ProviderCallback>> {
    let event: StripeEvent =
        serde_json::from_slice(body).map_err(|e| GatewayError::MalformedCallback {
            message: format!("invalid Stripe event: {e}"),
        })?;

    let status = match event.event_type.as_str() {
        "payment_intent.succeeded" => CallbackStatus::Approved,
        "payment_intent.payment_failed" => CallbackStatus::Failed,
        _ => return Ok(None),
    };

    let object = event.data.object;
    let reference = object
        .pointer("/metadata/reference")
        .or_else(|| object.get("id"))
        .and_then(|v| v.as_str())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::MalformedCallback {
            message: "payment intent carries no reference".to_string(),
        })?;

    Ok(Some(ProviderCallback {
        source: PaymentMethod::Card,
        reference,
        status,
        code: event.event_type,
        raw: json!({
            "id": object.get("id"),
            "status": object.get("status"),
            "last_payment_error": object.pointer("/last_payment_error/message"),
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(body);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign("whsec_test", Utc::now().timestamp(), body);
        assert!(verify_signature("whsec_test", &header, body, SIGNATURE_TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn rejects_tampered_body_and_stale_timestamp() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign("whsec_test", Utc::now().timestamp(), body);
        assert!(verify_signature("whsec_test", &header, b"{}", SIGNATURE_TOLERANCE_SECS).is_err());

        let stale = sign("whsec_test", Utc::now().timestamp() - 3_600, body);
        assert!(verify_signature("whsec_test", &stale, body, SIGNATURE_TOLERANCE_SECS).is_err());
        assert!(verify_signature("whsec_test", "garbage", body, SIGNATURE_TOLERANCE_SECS).is_err());
    }

    #[test]
    fn succeeded_event_uses_metadata_reference() {
        let body = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","metadata":{"reference":"CD123"}}}}"#;
        let callback = parse_event(body).expect("parse").expect("settling event");
        assert_eq!(callback.reference, "CD123");
        assert_eq!(callback.status, CallbackStatus::Approved);
    }

    #[test]
    fn failed_event_falls_back_to_intent_id() {
        let body = br#"{"type":"payment_intent.payment_failed","data":{"object":{"id":"pi_2"}}}"#;
        let callback = parse_event(body).expect("parse").expect("settling event");
        assert_eq!(callback.reference, "pi_2");
        assert_eq!(callback.status, CallbackStatus::Failed);
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let body = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        assert!(parse_event(body).expect("parse").is_none());
    }
}
