//! Payment creation and lookup.
//!
//! Three paths lead to a persisted attempt:
//! - free packages are approved immediately without any provider call
//! - card payments create a Stripe PaymentIntent and stay pending until the
//!   signed webhook arrives
//! - mobile-money payments go through the gateway dispatcher; the attempt is
//!   persisted only once the provider accepted the request

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::activation::PlanPeriod;
use super::settlement::Settlement;
use crate::error::AppError;
use crate::gateway::reference::generate_reference;
use crate::gateway::stripe::StripeClient;
use crate::gateway::{Direction, GatewayDispatcher, ProviderOutcome, ProviderStatus};
use crate::middleware::auth::AuthContext;
use crate::models::payment::{
    CardSummary, CreatePaymentRequest, NewPaymentAttempt, PaymentAttempt, PaymentMethod,
    PaymentResponse, PaymentStatus, PaymentTarget,
};
use crate::store::{ActivationStore, PaymentStore, StoreError};

/// Longest ad campaign that can be bought in one payment.
pub const MAX_AD_WEEKS: u32 = 52;

const MAX_REFERENCE_LEN: usize = 64;

/// Outcome of `create_payment`.
#[derive(Debug)]
pub struct PaymentCreated {
    pub response: PaymentResponse,
    /// Notification task for the new attempt; await it to observe delivery.
    pub notifications: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct PaymentService {
    payments: Arc<dyn PaymentStore>,
    targets: Arc<dyn ActivationStore>,
    dispatcher: Arc<GatewayDispatcher>,
    stripe: Option<Arc<StripeClient>>,
    settlement: Settlement,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        targets: Arc<dyn ActivationStore>,
        dispatcher: Arc<GatewayDispatcher>,
        stripe: Option<Arc<StripeClient>>,
        settlement: Settlement,
    ) -> Self {
        Self {
            payments,
            targets,
            dispatcher,
            stripe,
            settlement,
        }
    }

    /// Payment rails this instance can take, e.g. `mpesa/c2b` or `card`.
    pub fn rails(&self) -> Vec<String> {
        let mut rails: Vec<String> = self
            .dispatcher
            .registered()
            .into_iter()
            .map(|(provider, direction)| format!("{provider}/{direction}"))
            .collect();
        if self.stripe.is_some() {
            rails.push("card".to_string());
        }
        rails
    }

    /// Validate the request, call the provider if needed, and persist the attempt.
    ///
    /// # Errors
    ///
    /// - `Validation` for bad input, a reference already in use or a target
    ///   the caller does not own, all detected before any provider call
    /// - `Forbidden` for payouts requested by non-admins
    /// - `PaymentFailed` when the provider declines or cannot be reached;
    ///   nothing is persisted in that case
    pub async fn create_payment(
        &self,
        auth: &AuthContext,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, AppError> {
        validate_request(auth, &request)?;
        if !self.targets.owns_target(auth.user_id, &request.target).await? {
            return Err(AppError::validation(
                "target",
                "target does not exist or belongs to another user",
            ));
        }
        if let Some(reference) = &request.reference {
            self.ensure_reference_unused(reference).await?;
        }

        match request.method {
            PaymentMethod::Free => self.create_free(auth, request).await,
            PaymentMethod::Card => self.create_card(auth, request).await,
            PaymentMethod::Mpesa | PaymentMethod::Emola => {
                self.create_mobile_money(auth, request).await
            }
        }
    }

    async fn create_free(
        &self,
        auth: &AuthContext,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, AppError> {
        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| generate_reference("FR"));
        let payment = self
            .insert(NewPaymentAttempt {
                transaction_reference: reference,
                provider_reference: None,
                owner_user_id: auth.user_id,
                package_name: request.package_name,
                payment_method: PaymentMethod::Free,
                direction: Direction::C2b,
                phone: None,
                amount_cents: 0,
                card_details: None,
                status: PaymentStatus::Approved,
                provider_response: json!({ "free": true }),
                target: request.target,
                paid_at: Some(Utc::now()),
            })
            .await?;
        info!(payment_id = %payment.id, owner = %auth.user_id, "free package approved");

        let settled = self.settlement.settle(&payment).await;
        Ok(PaymentCreated {
            response: PaymentResponse {
                status: payment.status,
                message: Some("Free package activated".to_string()),
                data: Some(payment.into()),
                client_secret: None,
            },
            notifications: Some(settled.notifications),
        })
    }

    async fn create_card(
        &self,
        auth: &AuthContext,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, AppError> {
        let stripe = self
            .stripe
            .as_ref()
            .ok_or_else(|| AppError::validation("method", "card payments are not configured"))?;

        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| generate_reference("CD"));
        let mut outcome = stripe
            .create_payment_intent(request.amount_cents, &reference)
            .await?;
        if outcome.status != ProviderStatus::Pending {
            return Err(decline(&outcome));
        }

        // The client secret goes to the payer, never into the audit snapshot.
        let client_secret = outcome
            .provider_data
            .as_object_mut()
            .and_then(|data| data.remove("client_secret"))
            .and_then(|secret| secret.as_str().map(str::to_string));

        let payment = self
            .insert(NewPaymentAttempt {
                transaction_reference: outcome.transaction_reference,
                provider_reference: outcome.provider_reference,
                owner_user_id: auth.user_id,
                package_name: request.package_name,
                payment_method: PaymentMethod::Card,
                direction: Direction::C2b,
                phone: None,
                amount_cents: request.amount_cents,
                card_details: request.card,
                status: PaymentStatus::Pending,
                provider_response: outcome.provider_data,
                target: request.target,
                paid_at: None,
            })
            .await?;
        info!(payment_id = %payment.id, reference = %payment.transaction_reference, "card payment pending");

        let settled = self.settlement.settle(&payment).await;
        Ok(PaymentCreated {
            response: PaymentResponse {
                status: payment.status,
                message: Some("Confirm the card payment to complete".to_string()),
                data: Some(payment.into()),
                client_secret,
            },
            notifications: Some(settled.notifications),
        })
    }

    async fn create_mobile_money(
        &self,
        auth: &AuthContext,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, AppError> {
        let Some(provider) = request.method.mobile_money_provider() else {
            return Err(AppError::validation("method", "not a mobile-money method"));
        };

        let outcome = self
            .dispatcher
            .pay(
                provider,
                request.phone.clone(),
                request.amount_cents,
                request.direction,
                request.reference.clone(),
            )
            .await?;

        let (status, paid_at, message) = match outcome.status {
            ProviderStatus::Pending => (
                PaymentStatus::Pending,
                None,
                "Confirm the payment on your phone",
            ),
            ProviderStatus::Success => (PaymentStatus::Approved, Some(Utc::now()), "Payment completed"),
            ProviderStatus::Fail | ProviderStatus::Error => {
                warn!(
                    provider = %provider,
                    reference = %outcome.transaction_reference,
                    status = ?outcome.status,
                    "provider declined payment"
                );
                return Err(decline(&outcome));
            }
        };

        let payment = self
            .insert(NewPaymentAttempt {
                transaction_reference: outcome.transaction_reference,
                provider_reference: outcome.provider_reference,
                owner_user_id: auth.user_id,
                package_name: request.package_name,
                payment_method: request.method,
                direction: request.direction,
                phone: request.phone,
                amount_cents: request.amount_cents,
                card_details: None,
                status,
                provider_response: outcome.provider_data,
                target: request.target,
                paid_at,
            })
            .await?;
        info!(
            payment_id = %payment.id,
            reference = %payment.transaction_reference,
            status = %payment.status,
            direction = %payment.direction,
            "mobile-money payment recorded"
        );

        let settled = self.settlement.settle(&payment).await;
        Ok(PaymentCreated {
            response: PaymentResponse {
                status: payment.status,
                message: Some(message.to_string()),
                data: Some(payment.into()),
                client_secret: None,
            },
            notifications: Some(settled.notifications),
        })
    }

    /// Rejects a caller-supplied reference before the provider is charged.
    /// The unique index on `transaction_reference` still catches races.
    async fn ensure_reference_unused(&self, reference: &str) -> Result<(), AppError> {
        match self.payments.find_by_reference(reference).await? {
            Some(_) => Err(reference_taken(reference)),
            None => Ok(()),
        }
    }

    async fn insert(&self, payment: NewPaymentAttempt) -> Result<PaymentAttempt, AppError> {
        self.payments.insert_payment(payment).await.map_err(|e| match e {
            StoreError::DuplicateReference(reference) => reference_taken(&reference),
            other => other.into(),
        })
    }

    pub async fn get_payment(&self, owner: Uuid, id: Uuid) -> Result<PaymentAttempt, AppError> {
        self.payments
            .find_payment(owner, id)
            .await?
            .ok_or(AppError::PaymentNotFound)
    }

    pub async fn list_payments(&self, owner: Uuid, limit: i64) -> Result<Vec<PaymentAttempt>, AppError> {
        Ok(self.payments.list_payments(owner, limit.clamp(1, 200)).await?)
    }
}

fn reference_taken(reference: &str) -> AppError {
    AppError::validation(
        "reference",
        format!("transaction reference {reference} is already used"),
    )
}

fn decline(outcome: &ProviderOutcome) -> AppError {
    AppError::PaymentFailed(outcome.failure_message())
}

/// Checks that need no provider and no store.
fn validate_request(auth: &AuthContext, request: &CreatePaymentRequest) -> Result<(), AppError> {
    if request.amount_cents < 0 {
        return Err(AppError::validation("amount_cents", "amount cannot be negative"));
    }
    let is_free = request.method == PaymentMethod::Free;
    if is_free != (request.amount_cents == 0) {
        return Err(AppError::validation(
            "amount_cents",
            "amount must be zero for the free package and positive otherwise",
        ));
    }
    if request.package_name.trim().is_empty() {
        return Err(AppError::validation("package_name", "package_name is required"));
    }
    if is_free {
        if !matches!(request.package_name.parse::<PlanPeriod>(), Ok(PlanPeriod::Free)) {
            return Err(AppError::validation(
                "package_name",
                "the free method only buys the free package",
            ));
        }
        if matches!(request.target, PaymentTarget::Ad { .. }) {
            return Err(AppError::validation("target", "ads cannot be published for free"));
        }
    }

    if let Some(reference) = &request.reference {
        let valid = !reference.is_empty()
            && reference.len() <= MAX_REFERENCE_LEN
            && reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AppError::validation(
                "reference",
                "reference must be 1-64 characters of letters, digits, '-' or '_'",
            ));
        }
    }

    if request.direction == Direction::B2c {
        auth.require_admin()?;
        if request.method.mobile_money_provider().is_none() {
            return Err(AppError::validation(
                "type",
                "payouts are only available for mobile money",
            ));
        }
        if request.target != PaymentTarget::None {
            return Err(AppError::validation("target", "payouts cannot activate anything"));
        }
    }

    if request.method == PaymentMethod::Card {
        match &request.card {
            Some(CardSummary { last4, .. })
                if last4.len() == 4 && last4.chars().all(|c| c.is_ascii_digit()) => {}
            Some(_) => {
                return Err(AppError::validation("card", "last4 must be exactly 4 digits"));
            }
            None => {}
        }
    } else if request.card.is_some() {
        return Err(AppError::validation("card", "card details are only accepted for card payments"));
    }

    match &request.target {
        PaymentTarget::Ad { weeks, .. } if *weeks == 0 || *weeks > MAX_AD_WEEKS => {
            Err(AppError::validation(
                "target",
                format!("ads run between 1 and {MAX_AD_WEEKS} weeks"),
            ))
        }
        PaymentTarget::Subscription | PaymentTarget::TalentListing { .. } => request
            .package_name
            .parse::<PlanPeriod>()
            .map(|_| ())
            .map_err(|_| {
                AppError::validation(
                    "package_name",
                    "package must name a period: free, monthly or annual",
                )
            }),
        _ => Ok(()),
    }
}
