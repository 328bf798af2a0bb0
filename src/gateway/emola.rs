//! eMola (Movitel) mobile-money clients over the partner SOAP gateway.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use super::ProviderClient;
use super::auth::{Credential, EnvelopeAuthenticator, EnvelopeCredentials, ProviderAuthenticator};
use super::error::{GatewayError, GatewayResult};
use super::phone::{EMOLA_PREFIXES, normalize_msisdn};
use super::reference::generate_reference;
use super::types::{
    CallbackStatus, Direction, ProviderCallback, ProviderName, ProviderOutcome, ProviderRequest,
    ProviderStatus, format_amount,
};
use super::xml::{element_text, escape};
use crate::models::payment::PaymentMethod;

pub const ACCEPTED_CODE: &str = "0";

const C2B_OPERATION: &str = "pushUssdMessage";
const B2C_OPERATION: &str = "pushUssdDisbursementB2C";

#[derive(Debug, Clone)]
pub struct EmolaConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub partner_code: String,
    pub key: String,
    pub timeout: Duration,
}

pub struct EmolaClient {
    direction: Direction,
    url: String,
    authenticator: Arc<dyn ProviderAuthenticator>,
    http: reqwest::Client,
}

impl EmolaClient {
    pub fn pair(config: &EmolaConfig) -> GatewayResult<(Self, Self)> {
        let authenticator: Arc<dyn ProviderAuthenticator> =
            Arc::new(EnvelopeAuthenticator::new(EnvelopeCredentials {
                username: config.username.clone(),
                password: config.password.clone(),
                partner_code: config.partner_code.clone(),
                key: config.key.clone(),
            }));
        // Fail at startup rather than on the first payment.
        authenticator.build_credential()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to initialize HTTP client: {e}"),
            })?;

        let client = |direction| Self {
            direction,
            url: config.url.clone(),
            authenticator: authenticator.clone(),
            http: http.clone(),
        };
        Ok((client(Direction::C2b), client(Direction::B2c)))
    }

    fn operation(&self) -> &'static str {
        match self.direction {
            Direction::C2b => C2B_OPERATION,
            Direction::B2c => B2C_OPERATION,
        }
    }
}

/// Build the `gwOperation` envelope for one request.
pub fn build_envelope(
    credentials: &EnvelopeCredentials,
    operation: &str,
    msisdn: &str,
    amount_cents: i64,
    reference: &str,
) -> String {
    let amount = format_amount(amount_cents);
    let params = [
        ("partnerCode", credentials.partner_code.as_str()),
        ("msisdn", msisdn),
        ("transAmount", amount.as_str()),
        ("transId", reference),
        ("refNo", reference),
        ("key", credentials.key.as_str()),
    ];

    let mut xml = String::from(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:web="http://webservice.bccsgw.viettel.com/"><soapenv:Header/><soapenv:Body><web:gwOperation><Input>"#,
    );
    let _ = write!(
        xml,
        "<username>{}</username><password>{}</password><wscode>{}</wscode>",
        escape(&credentials.username),
        escape(&credentials.password),
        escape(operation)
    );
    for (name, value) in params {
        let _ = write!(xml, r#"<param name="{name}" value="{}"/>"#, escape(value));
    }
    xml.push_str("</Input></web:gwOperation></soapenv:Body></soapenv:Envelope>");
    xml
}

/// Result code of a gateway response. The gateway wraps the partner service
/// reply as an escaped document inside `<original>`; its code wins when present.
fn response_code(xml: &str) -> GatewayResult<Option<String>> {
    if let Some(original) = element_text(xml, "original")? {
        if let Some(code) = element_text(&original, "errorCode")? {
            return Ok(Some(code));
        }
    }
    match element_text(xml, "errorCode")? {
        Some(code) => Ok(Some(code)),
        None => element_text(xml, "error"),
    }
}

#[async_trait]
impl ProviderClient for EmolaClient {
    fn provider(&self) -> ProviderName {
        ProviderName::Emola
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    async fn payment(&self, request: ProviderRequest) -> GatewayResult<ProviderOutcome> {
        let phone = request
            .phone
            .as_deref()
            .ok_or_else(|| GatewayError::validation("phone", "phone is required for eMola"))?;
        let msisdn = normalize_msisdn(phone, EMOLA_PREFIXES)?;
        if request.amount_cents <= 0 {
            return Err(GatewayError::validation("amount", "amount must be greater than zero"));
        }

        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| generate_reference("EM"));
        let Credential::Envelope(credentials) = self.authenticator.build_credential()? else {
            return Err(GatewayError::credential("emola", "expected envelope credentials"));
        };
        let envelope = build_envelope(
            &credentials,
            self.operation(),
            &msisdn,
            request.amount_cents,
            &reference,
        );

        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(envelope)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                warn!(reference = %reference, direction = %self.direction, error = %e, "eMola request failed");
                return Ok(ProviderOutcome {
                    status: ProviderStatus::Error,
                    transaction_reference: reference,
                    provider_reference: None,
                    provider_data: json!({ "message": e.to_string() }),
                });
            }
        };

        let http_status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let code = match response_code(&body) {
            Ok(code) => code,
            Err(e) => {
                warn!(reference = %reference, error = %e, "unreadable eMola response");
                None
            }
        };

        let status = match (code.as_deref(), self.direction) {
            (Some(ACCEPTED_CODE), Direction::C2b) => ProviderStatus::Pending,
            (Some(ACCEPTED_CODE), Direction::B2c) => ProviderStatus::Success,
            _ => ProviderStatus::Fail,
        };
        info!(
            reference = %reference,
            direction = %self.direction,
            http_status,
            code = code.as_deref().unwrap_or("none"),
            ?status,
            "eMola responded"
        );

        let description = element_text(&body, "description").ok().flatten();
        Ok(ProviderOutcome {
            status,
            transaction_reference: reference,
            provider_reference: None,
            provider_data: json!({
                "http_status": http_status,
                "error_code": code,
                "description": description,
                "raw": body,
            }),
        })
    }
}

/// Reduce an eMola SOAP callback to the reference and settlement result.
pub fn parse_callback(xml: &str) -> GatewayResult<ProviderCallback> {
    let reference = match element_text(xml, "refNo")? {
        Some(reference) if !reference.is_empty() => reference,
        _ => element_text(xml, "transId")?
            .filter(|r| !r.is_empty())
            .ok_or_else(|| GatewayError::MalformedCallback {
                message: "callback carries neither refNo nor transId".to_string(),
            })?,
    };
    let code = element_text(xml, "errorCode")?.ok_or_else(|| GatewayError::MalformedCallback {
        message: "callback carries no errorCode".to_string(),
    })?;
    let trans_id = element_text(xml, "transId")?;

    let status = if code == ACCEPTED_CODE {
        CallbackStatus::Approved
    } else {
        CallbackStatus::Failed
    };

    Ok(ProviderCallback {
        source: PaymentMethod::Emola,
        reference,
        status,
        raw: json!({ "errorCode": code, "transId": trans_id }),
        code,
    })
}

/// SOAP acknowledgement returned to the gateway for every callback.
pub fn callback_ack(code: &str, trans_id: Option<&str>) -> String {
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Body><callbackResponse><errorCode>{}</errorCode><transId>{}</transId></callbackResponse></soapenv:Body></soapenv:Envelope>"#,
        escape(code),
        escape(trans_id.unwrap_or_default())
    )
}
