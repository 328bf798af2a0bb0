//! Side effects of a payment reaching a new status.
//!
//! Activation runs inline so the caller knows what was activated; outbound
//! webhooks and admin fan-out run on a spawned task and never delay or fail
//! the caller.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::activation::{Activation, ActivationService};
use super::admin_notifier::AdminNotifier;
use super::webhook_service::WebhookNotifier;
use crate::gateway::format_amount;
use crate::models::payment::{PaymentAttempt, PaymentStatus, PaymentView};
use crate::models::webhook::WebhookEvent;

/// Result of settling a payment.
#[derive(Debug)]
pub struct Settled {
    pub activation: Option<Activation>,
    /// Background notification task; await it to observe delivery.
    pub notifications: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Settlement {
    activation: ActivationService,
    webhooks: WebhookNotifier,
    admins: AdminNotifier,
}

fn event_data(payment: &PaymentAttempt) -> serde_json::Value {
    serde_json::to_value(PaymentView::from(payment.clone())).unwrap_or_default()
}

impl Settlement {
    pub fn new(activation: ActivationService, webhooks: WebhookNotifier, admins: AdminNotifier) -> Self {
        Self {
            activation,
            webhooks,
            admins,
        }
    }

    /// Run the effects for the payment's current status.
    ///
    /// - approved: activate the target, then notify `payment.approved`, the
    ///   activation event, and admins
    /// - failed: notify `payment.failed`
    /// - pending: notify `payment.pending`
    pub async fn settle(&self, payment: &PaymentAttempt) -> Settled {
        let activation = if payment.status == PaymentStatus::Approved {
            match self.activation.activate(payment).await {
                Ok(activation) => activation,
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "activation failed after approval");
                    None
                }
            }
        } else {
            None
        };

        let webhooks = self.webhooks.clone();
        let admins = self.admins.clone();
        let payment = payment.clone();
        let activated = activation.clone();
        let notifications = tokio::spawn(async move {
            let owner = payment.owner_user_id;
            let data = event_data(&payment);
            match payment.status {
                PaymentStatus::Pending => {
                    webhooks.notify(owner, WebhookEvent::PaymentPending, data).await;
                }
                PaymentStatus::Failed => {
                    webhooks.notify(owner, WebhookEvent::PaymentFailed, data).await;
                }
                PaymentStatus::Approved => {
                    webhooks
                        .notify(owner, WebhookEvent::PaymentApproved, data.clone())
                        .await;
                    if let Some(activation) = &activated {
                        if let Some(event) = activation.event() {
                            webhooks.notify(owner, event, activation.to_json()).await;
                        }
                    }
                    let body = format!(
                        "{} {} via {}",
                        payment.package_name,
                        format_amount(payment.amount_cents),
                        payment.payment_method
                    );
                    admins
                        .notify_admins(
                            WebhookEvent::PaymentApproved.as_str(),
                            "Payment approved",
                            &body,
                            data,
                        )
                        .await;
                }
            }
            info!(payment_id = %payment.id, status = %payment.status, "payment notifications sent");
        });

        Settled {
            activation,
            notifications,
        }
    }
}
