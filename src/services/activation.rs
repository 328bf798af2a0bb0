//! Activation of what an approved payment bought.
//!
//! All expiry windows are decided by [`ExpiryPolicy`]; nothing else in the
//! crate computes an expiry date.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::UnknownVariant;
use crate::models::payment::{PaymentAttempt, PaymentTarget};
use crate::models::webhook::WebhookEvent;
use crate::store::{ActivationStore, StoreResult};

/// Billing period of a plan package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanPeriod {
    Free,
    Monthly,
    Annual,
}

impl PlanPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanPeriod::Free => "free",
            PlanPeriod::Monthly => "monthly",
            PlanPeriod::Annual => "annual",
        }
    }
}

impl FromStr for PlanPeriod {
    type Err = UnknownVariant;

    /// Package names look like `monthly`, `plan-annual` or `Premium Yearly`;
    /// the period keyword decides.
    fn from_str(package: &str) -> Result<Self, Self::Err> {
        let lower = package.to_lowercase();
        if lower.contains("free") || lower.contains("trial") {
            Ok(PlanPeriod::Free)
        } else if lower.contains("month") {
            Ok(PlanPeriod::Monthly)
        } else if lower.contains("annual") || lower.contains("year") {
            Ok(PlanPeriod::Annual)
        } else {
            Err(UnknownVariant::new("plan package", package))
        }
    }
}

/// Expiry windows for every activatable product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub free_days: i64,
    pub monthly_days: i64,
    pub annual_days: i64,
    pub days_per_ad_week: i64,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            free_days: 7,
            monthly_days: 30,
            annual_days: 365,
            days_per_ad_week: 7,
        }
    }
}

impl ExpiryPolicy {
    pub fn ad_expiry(&self, from: DateTime<Utc>, weeks: u32) -> DateTime<Utc> {
        from + Duration::days(i64::from(weeks) * self.days_per_ad_week)
    }

    pub fn plan_expiry(&self, from: DateTime<Utc>, period: PlanPeriod) -> DateTime<Utc> {
        let days = match period {
            PlanPeriod::Free => self.free_days,
            PlanPeriod::Monthly => self.monthly_days,
            PlanPeriod::Annual => self.annual_days,
        };
        from + Duration::days(days)
    }
}

/// What was activated, reported to notification listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activation {
    Ad {
        ad_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    Subscription {
        user_id: Uuid,
        plan: PlanPeriod,
        expires_at: DateTime<Utc>,
    },
    TalentListing {
        listing_id: Uuid,
        expires_at: DateTime<Utc>,
    },
}

impl Activation {
    /// Outbound webhook event announcing this activation, if there is one.
    pub fn event(&self) -> Option<WebhookEvent> {
        match self {
            Activation::Ad { .. } => Some(WebhookEvent::AdActivated),
            Activation::Subscription { .. } => Some(WebhookEvent::SubscriptionActivated),
            Activation::TalentListing { .. } => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

#[derive(Clone)]
pub struct ActivationService {
    store: Arc<dyn ActivationStore>,
    policy: ExpiryPolicy,
}

impl ActivationService {
    pub fn new(store: Arc<dyn ActivationStore>, policy: ExpiryPolicy) -> Self {
        Self { store, policy }
    }

    /// Activate the payment's target. `Ok(None)` when the payment buys
    /// nothing, or the payer no longer owns its ad or listing.
    pub async fn activate(&self, payment: &PaymentAttempt) -> StoreResult<Option<Activation>> {
        let now = Utc::now();
        let activation = match &payment.target {
            PaymentTarget::None => return Ok(None),
            PaymentTarget::Ad { ad_id, weeks } => {
                let expires_at = self.policy.ad_expiry(now, *weeks);
                if !self
                    .store
                    .activate_ad(payment.owner_user_id, *ad_id, expires_at)
                    .await?
                {
                    warn!(payment_id = %payment.id, %ad_id, "payer no longer owns the paid ad");
                    return Ok(None);
                }
                Activation::Ad {
                    ad_id: *ad_id,
                    expires_at,
                }
            }
            PaymentTarget::Subscription => {
                let Ok(plan) = payment.package_name.parse::<PlanPeriod>() else {
                    warn!(payment_id = %payment.id, package = %payment.package_name, "package is not a plan");
                    return Ok(None);
                };
                let expires_at = self.policy.plan_expiry(now, plan);
                self.store
                    .activate_plan(payment.owner_user_id, plan.as_str(), expires_at)
                    .await?;
                Activation::Subscription {
                    user_id: payment.owner_user_id,
                    plan,
                    expires_at,
                }
            }
            PaymentTarget::TalentListing { listing_id } => {
                let Ok(plan) = payment.package_name.parse::<PlanPeriod>() else {
                    warn!(payment_id = %payment.id, package = %payment.package_name, "package is not a plan");
                    return Ok(None);
                };
                let expires_at = self.policy.plan_expiry(now, plan);
                if !self
                    .store
                    .activate_talent_listing(payment.owner_user_id, *listing_id, expires_at)
                    .await?
                {
                    warn!(payment_id = %payment.id, %listing_id, "payer no longer owns the paid listing");
                    return Ok(None);
                }
                Activation::TalentListing {
                    listing_id: *listing_id,
                    expires_at,
                }
            }
        };

        info!(payment_id = %payment.id, activation = ?activation, "activated purchase");
        Ok(Some(activation))
    }
}
