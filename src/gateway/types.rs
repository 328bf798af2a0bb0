use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::UnknownVariant;
use crate::models::payment::PaymentMethod;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Mpesa,
    Emola,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Mpesa => "mpesa",
            ProviderName::Emola => "emola",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mpesa" | "m-pesa" => Ok(ProviderName::Mpesa),
            "emola" | "e-mola" => Ok(ProviderName::Emola),
            _ => Err(UnknownVariant::new("provider", value)),
        }
    }
}

/// Direction of the money flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Consumer pays the business (push prompt on the payer's phone)
    C2b,
    /// Business pays the consumer (payouts, refunds)
    B2c,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::C2b => "c2b",
            Direction::B2c => "b2c",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "c2b" => Ok(Direction::C2b),
            "b2c" => Ok(Direction::B2c),
            other => Err(UnknownVariant::new("direction", other)),
        }
    }
}

/// Normalized outcome of a single provider call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    /// Provider completed the transfer synchronously
    Success,
    /// Provider accepted the request; the result arrives on a callback
    Pending,
    /// Provider answered with a non-success code
    Fail,
    /// Transport failure or timeout
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub phone: Option<String>,
    pub amount_cents: i64,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub status: ProviderStatus,
    pub transaction_reference: String,
    pub provider_reference: Option<String>,
    pub provider_data: JsonValue,
}

impl ProviderOutcome {
    /// Human-readable reason for a failed outcome, taken from the provider payload.
    pub fn failure_message(&self) -> String {
        ["output_ResponseDesc", "description", "message"]
            .iter()
            .find_map(|key| self.provider_data.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("provider returned status {:?}", self.status))
    }
}

/// Settlement result reported by a provider callback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Approved,
    Failed,
}

/// A provider callback reduced to what reconciliation needs.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCallback {
    pub source: PaymentMethod,
    /// Reference used to find the payment attempt
    pub reference: String,
    pub status: CallbackStatus,
    /// Provider's own result code, echoed in acknowledgements
    pub code: String,
    pub raw: JsonValue,
}

/// Format cents the way providers expect decimal amounts ("100.00").
pub fn format_amount(amount_cents: i64) -> String {
    format!("{}.{:02}", amount_cents / 100, amount_cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_use_two_decimals() {
        assert_eq!(format_amount(10000), "100.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(12345), "123.45");
    }

    #[test]
    fn provider_name_parsing_accepts_hyphenated_spelling() {
        assert_eq!("M-Pesa".parse::<ProviderName>(), Ok(ProviderName::Mpesa));
        assert_eq!("emola".parse::<ProviderName>(), Ok(ProviderName::Emola));
        assert!("paystack".parse::<ProviderName>().is_err());
    }
}
