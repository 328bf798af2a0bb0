//! Payment attempt models and API request/response types.
//!
//! This module defines:
//! - `PaymentAttempt`: one payment lifecycle, from request to terminal status
//! - `PaymentStatus`: the single status enum shared by every layer
//! - `PaymentTarget`: what an approved payment activates
//! - Request and response bodies for the payments API

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::UnknownVariant;
use crate::gateway::{Direction, ProviderName};

/// Lifecycle status of a payment attempt.
///
/// `Pending` may move to `Approved` or `Failed`. Both terminal states are
/// absorbing: nothing ever moves out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Approved)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "approved" => Ok(PaymentStatus::Approved),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

/// How the payer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Mpesa,
    Emola,
    Card,
    Free,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "mpesa",
            PaymentMethod::Emola => "emola",
            PaymentMethod::Card => "card",
            PaymentMethod::Free => "free",
        }
    }

    /// Mobile-money provider handling this method, if any.
    pub fn mobile_money_provider(&self) -> Option<ProviderName> {
        match self {
            PaymentMethod::Mpesa => Some(ProviderName::Mpesa),
            PaymentMethod::Emola => Some(ProviderName::Emola),
            PaymentMethod::Card | PaymentMethod::Free => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mpesa" => Ok(PaymentMethod::Mpesa),
            "emola" => Ok(PaymentMethod::Emola),
            "card" => Ok(PaymentMethod::Card),
            "free" => Ok(PaymentMethod::Free),
            other => Err(UnknownVariant::new("payment method", other)),
        }
    }
}

/// What an approved payment activates.
///
/// # JSON Example
///
/// ```json
/// { "kind": "ad", "ad_id": "550e8400-e29b-41d4-a716-446655440000", "weeks": 2 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentTarget {
    /// Nothing to activate (payouts, donations)
    #[default]
    None,
    /// Classified ad published for a number of weeks
    Ad { ad_id: Uuid, weeks: u32 },
    /// The payer's plan subscription, period taken from the package name
    Subscription,
    /// A talent profile listing, period taken from the package name
    TalentListing { listing_id: Uuid },
}

impl PaymentTarget {
    fn kind(&self) -> &'static str {
        match self {
            PaymentTarget::None => "none",
            PaymentTarget::Ad { .. } => "ad",
            PaymentTarget::Subscription => "subscription",
            PaymentTarget::TalentListing { .. } => "talent_listing",
        }
    }

    /// Split into the `(kind, id, weeks)` columns used by the database.
    pub fn to_columns(&self) -> (&'static str, Option<Uuid>, Option<i32>) {
        match self {
            PaymentTarget::None | PaymentTarget::Subscription => (self.kind(), None, None),
            PaymentTarget::Ad { ad_id, weeks } => {
                (self.kind(), Some(*ad_id), Some(i32::try_from(*weeks).unwrap_or(i32::MAX)))
            }
            PaymentTarget::TalentListing { listing_id } => (self.kind(), Some(*listing_id), None),
        }
    }

    pub fn from_columns(
        kind: &str,
        id: Option<Uuid>,
        weeks: Option<i32>,
    ) -> Result<Self, UnknownVariant> {
        match (kind, id) {
            ("none", _) => Ok(PaymentTarget::None),
            ("subscription", _) => Ok(PaymentTarget::Subscription),
            ("ad", Some(ad_id)) => Ok(PaymentTarget::Ad {
                ad_id,
                weeks: weeks.and_then(|w| u32::try_from(w).ok()).unwrap_or(0),
            }),
            ("talent_listing", Some(listing_id)) => Ok(PaymentTarget::TalentListing { listing_id }),
            (other, _) => Err(UnknownVariant::new("payment target", other)),
        }
    }
}

/// Display-only card summary. Full card numbers never reach this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
    pub brand: Option<String>,
    pub last4: String,
}

/// One payment lifecycle.
///
/// `transaction_reference` is the correlation key provider callbacks are
/// matched on and is unique across all attempts. `provider_reference` holds
/// the provider's own transaction id when the provider assigns one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub transaction_reference: String,
    pub provider_reference: Option<String>,
    pub owner_user_id: Uuid,
    pub package_name: String,
    pub payment_method: PaymentMethod,
    pub direction: Direction,
    pub phone: Option<String>,
    /// Amount in cents, never negative. Zero only for the free package.
    pub amount_cents: i64,
    pub card_details: Option<CardSummary>,
    pub status: PaymentStatus,
    /// Raw provider payloads captured for audit and debugging
    pub provider_response: serde_json::Value,
    pub target: PaymentTarget,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Row shape of the `payment_attempts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub transaction_reference: String,
    pub provider_reference: Option<String>,
    pub owner_user_id: Uuid,
    pub package_name: String,
    pub payment_method: String,
    pub direction: String,
    pub phone: Option<String>,
    pub amount_cents: i64,
    pub card_details: Option<Json<CardSummary>>,
    pub status: String,
    pub provider_response: serde_json::Value,
    pub target_kind: String,
    pub target_id: Option<Uuid>,
    pub target_weeks: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for PaymentAttempt {
    type Error = UnknownVariant;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            transaction_reference: row.transaction_reference,
            provider_reference: row.provider_reference,
            owner_user_id: row.owner_user_id,
            package_name: row.package_name,
            payment_method: row.payment_method.parse()?,
            direction: row.direction.parse()?,
            phone: row.phone,
            amount_cents: row.amount_cents,
            card_details: row.card_details.map(|Json(card)| card),
            status: row.status.parse()?,
            provider_response: row.provider_response,
            target: PaymentTarget::from_columns(&row.target_kind, row.target_id, row.target_weeks)?,
            created_at: row.created_at,
            paid_at: row.paid_at,
        })
    }
}

/// Values for inserting a new payment attempt.
#[derive(Debug, Clone)]
pub struct NewPaymentAttempt {
    pub transaction_reference: String,
    pub provider_reference: Option<String>,
    pub owner_user_id: Uuid,
    pub package_name: String,
    pub payment_method: PaymentMethod,
    pub direction: Direction,
    pub phone: Option<String>,
    pub amount_cents: i64,
    pub card_details: Option<CardSummary>,
    pub status: PaymentStatus,
    pub provider_response: serde_json::Value,
    pub target: PaymentTarget,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Request body for `POST /api/v1/payments`.
///
/// # JSON Example
///
/// ```json
/// {
///   "method": "mpesa",
///   "phone": "841234567",
///   "amount_cents": 10000,
///   "type": "c2b",
///   "package_name": "featured-ad",
///   "target": { "kind": "ad", "ad_id": "550e8400-e29b-41d4-a716-446655440000", "weeks": 2 }
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub method: PaymentMethod,

    pub phone: Option<String>,

    pub amount_cents: i64,

    /// Direction of the money flow, defaults to consumer-to-business
    #[serde(rename = "type", default = "default_direction")]
    pub direction: Direction,

    /// Caller-supplied transaction reference (generated when absent)
    pub reference: Option<String>,

    pub package_name: String,

    #[serde(default)]
    pub target: PaymentTarget,

    /// Card summary shown back to the payer, card method only
    pub card: Option<CardSummary>,
}

fn default_direction() -> Direction {
    Direction::C2b
}

/// Payment attempt as returned to API clients (provider payloads omitted).
#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub id: Uuid,
    pub transaction_reference: String,
    pub package_name: String,
    pub payment_method: PaymentMethod,
    pub direction: Direction,
    pub amount_cents: i64,
    pub card_details: Option<CardSummary>,
    pub status: PaymentStatus,
    pub target: PaymentTarget,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<PaymentAttempt> for PaymentView {
    fn from(payment: PaymentAttempt) -> Self {
        Self {
            id: payment.id,
            transaction_reference: payment.transaction_reference,
            package_name: payment.package_name,
            payment_method: payment.payment_method,
            direction: payment.direction,
            amount_cents: payment.amount_cents,
            card_details: payment.card_details,
            status: payment.status,
            target: payment.target,
            created_at: payment.created_at,
            paid_at: payment.paid_at,
        }
    }
}

/// Response body for `POST /api/v1/payments`.
///
/// ```json
/// { "status": "pending", "data": { "transaction_reference": "MP1734690000000AB12", ... } }
/// ```
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub status: PaymentStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PaymentView>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Stripe client secret used by the browser to confirm a card payment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PaymentStatus; 3] = [
        PaymentStatus::Pending,
        PaymentStatus::Approved,
        PaymentStatus::Failed,
    ];

    #[test]
    fn only_pending_moves_forward() {
        for from in ALL {
            for to in ALL {
                let expected = from == PaymentStatus::Pending && to != PaymentStatus::Pending;
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_states_are_absorbing() {
        assert!(!PaymentStatus::Approved.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Approved));
        assert!(PaymentStatus::Approved.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }

    #[test]
    fn target_survives_column_split() {
        let ad_id = Uuid::new_v4();
        let target = PaymentTarget::Ad { ad_id, weeks: 3 };
        let (kind, id, weeks) = target.to_columns();
        assert_eq!(PaymentTarget::from_columns(kind, id, weeks), Ok(target));

        assert!(PaymentTarget::from_columns("ad", None, Some(2)).is_err());
        assert!(PaymentTarget::from_columns("banner", None, None).is_err());
    }

    #[test]
    fn request_defaults_to_c2b_without_target() {
        let request: CreatePaymentRequest = serde_json::from_value(serde_json::json!({
            "method": "emola",
            "phone": "861234567",
            "amount_cents": 5000,
            "package_name": "monthly"
        }))
        .expect("valid request");

        assert_eq!(request.direction, Direction::C2b);
        assert_eq!(request.target, PaymentTarget::None);
        assert_eq!(request.method.mobile_money_provider(), Some(ProviderName::Emola));
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("paid".parse::<PaymentStatus>().is_err());
        assert_eq!("approved".parse::<PaymentStatus>(), Ok(PaymentStatus::Approved));
    }
}
