//! M-Pesa (Vodacom) mobile-money clients.
//!
//! Both directions share a JSON REST transport and an RSA bearer token; they
//! differ only in endpoint and in how an accepted request is reported:
//! c2b prompts the payer and settles on a callback, b2c settles immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use super::auth::{ProviderAuthenticator, RsaBearerAuthenticator};
use super::error::{GatewayError, GatewayResult};
use super::phone::{MPESA_PREFIXES, normalize_msisdn, to_international};
use super::reference::generate_reference;
use super::types::{
    CallbackStatus, Direction, ProviderCallback, ProviderName, ProviderOutcome, ProviderRequest,
    ProviderStatus, format_amount,
};
use super::ProviderClient;
use crate::models::payment::PaymentMethod;

/// Response code M-Pesa uses for an accepted request.
pub const ACCEPTED_CODE: &str = "INS-0";

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub api_key: String,
    pub public_key: String,
    pub service_provider_code: String,
    pub c2b_url: String,
    pub b2c_url: String,
    pub origin: String,
    pub timeout: Duration,
}

pub struct MpesaClient {
    direction: Direction,
    url: String,
    origin: String,
    service_provider_code: String,
    authenticator: Arc<dyn ProviderAuthenticator>,
    http: reqwest::Client,
}

impl MpesaClient {
    /// Build the c2b and b2c clients sharing one authenticator and HTTP pool.
    pub fn pair(config: &MpesaConfig) -> GatewayResult<(Self, Self)> {
        let authenticator: Arc<dyn ProviderAuthenticator> = Arc::new(RsaBearerAuthenticator::new(
            config.api_key.clone(),
            &config.public_key,
        )?);
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to initialize HTTP client: {e}"),
            })?;

        let client = |direction: Direction, url: &str| Self {
            direction,
            url: url.to_string(),
            origin: config.origin.clone(),
            service_provider_code: config.service_provider_code.clone(),
            authenticator: authenticator.clone(),
            http: http.clone(),
        };

        Ok((
            client(Direction::C2b, &config.c2b_url),
            client(Direction::B2c, &config.b2c_url),
        ))
    }

    fn accepted_status(&self) -> ProviderStatus {
        match self.direction {
            Direction::C2b => ProviderStatus::Pending,
            Direction::B2c => ProviderStatus::Success,
        }
    }
}

#[async_trait]
impl ProviderClient for MpesaClient {
    fn provider(&self) -> ProviderName {
        ProviderName::Mpesa
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    async fn payment(&self, request: ProviderRequest) -> GatewayResult<ProviderOutcome> {
        let phone = request
            .phone
            .as_deref()
            .ok_or_else(|| GatewayError::validation("phone", "phone is required for M-Pesa"))?;
        let local = normalize_msisdn(phone, MPESA_PREFIXES)?;
        if request.amount_cents <= 0 {
            return Err(GatewayError::validation("amount", "amount must be greater than zero"));
        }

        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| generate_reference("MP"));
        let credential = self.authenticator.build_credential()?;

        let body = json!({
            "input_TransactionReference": reference,
            "input_CustomerMSISDN": to_international(&local),
            "input_Amount": format_amount(request.amount_cents),
            "input_ThirdPartyReference": reference,
            "input_ServiceProviderCode": self.service_provider_code,
        });

        let response = credential
            .apply(self.http.post(&self.url))
            .header("Origin", &self.origin)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                warn!(reference = %reference, direction = %self.direction, error = %e, "M-Pesa request failed");
                return Ok(ProviderOutcome {
                    status: ProviderStatus::Error,
                    transaction_reference: reference,
                    provider_reference: None,
                    provider_data: json!({ "message": e.to_string() }),
                });
            }
        };

        let http_status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let data: JsonValue =
            serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text, "http_status": http_status }));

        let code = data.get("output_ResponseCode").and_then(|v| v.as_str());
        let status = if code == Some(ACCEPTED_CODE) {
            self.accepted_status()
        } else {
            ProviderStatus::Fail
        };
        info!(
            reference = %reference,
            direction = %self.direction,
            http_status,
            code = code.unwrap_or("none"),
            ?status,
            "M-Pesa responded"
        );

        Ok(ProviderOutcome {
            status,
            transaction_reference: reference,
            provider_reference: data
                .get("output_TransactionID")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            provider_data: data,
        })
    }
}

/// JSON body M-Pesa posts to the callback endpoint.
#[derive(Debug, Deserialize)]
struct MpesaCallbackBody {
    #[serde(alias = "output_ThirdPartyReference", alias = "input_ThirdPartyReference")]
    reference: Option<String>,
    #[serde(alias = "output_TransactionID")]
    transaction_id: Option<String>,
    #[serde(alias = "output_ResponseCode")]
    response_code: String,
}

/// Reduce an M-Pesa callback to the reference and settlement result.
///
/// The third-party reference is preferred; the provider transaction id is
/// used when it is the only identifier present.
pub fn parse_callback(body: &[u8]) -> GatewayResult<ProviderCallback> {
    let raw: JsonValue = serde_json::from_slice(body).map_err(|e| GatewayError::MalformedCallback {
        message: format!("invalid JSON: {e}"),
    })?;
    let parsed: MpesaCallbackBody =
        serde_json::from_value(raw.clone()).map_err(|e| GatewayError::MalformedCallback {
            message: format!("unexpected M-Pesa callback shape: {e}"),
        })?;

    let reference = parsed
        .reference
        .or(parsed.transaction_id)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| GatewayError::MalformedCallback {
            message: "callback carries no reference".to_string(),
        })?;

    let status = if parsed.response_code == ACCEPTED_CODE {
        CallbackStatus::Approved
    } else {
        CallbackStatus::Failed
    };

    Ok(ProviderCallback {
        source: PaymentMethod::Mpesa,
        reference,
        status,
        code: parsed.response_code,
        raw,
    })
}
