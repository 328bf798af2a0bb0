//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::gateway::GatewayDispatcher;
use crate::gateway::stripe::StripeClient;
use crate::services::activation::{ActivationService, ExpiryPolicy};
use crate::services::admin_notifier::{AdminNotifier, ChannelBroadcaster, PushService};
use crate::services::payment_service::PaymentService;
use crate::services::reconciliation::Reconciler;
use crate::services::settlement::Settlement;
use crate::services::webhook_service::{NotifierConfig, WebhookNotifier};
use crate::store::Stores;

/// Everything that varies between production, local runs and tests.
pub struct StateConfig {
    pub dispatcher: GatewayDispatcher,
    pub stripe: Option<StripeClient>,
    /// Secret for verifying `Stripe-Signature` headers
    pub stripe_webhook_secret: Option<String>,
    pub notifier: NotifierConfig,
    pub expiry: ExpiryPolicy,
    pub push: Option<Arc<dyn PushService>>,
    pub delivery_log_retention: chrono::Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub payments: PaymentService,
    pub reconciler: Reconciler,
    pub notifier: WebhookNotifier,
    pub broadcaster: ChannelBroadcaster,
    pub stripe_webhook_secret: Option<Arc<str>>,
    pub delivery_log_retention: chrono::Duration,
}

impl AppState {
    /// Wire services on top of the stores.
    ///
    /// # Errors
    ///
    /// Fails only if the webhook HTTP client cannot be built.
    pub fn new(stores: Stores, config: StateConfig) -> Result<Self, reqwest::Error> {
        let notifier = WebhookNotifier::new(stores.webhooks.clone(), config.notifier)?;
        let broadcaster = ChannelBroadcaster::new();
        let admins = AdminNotifier::new(
            stores.push.clone(),
            config.push,
            Arc::new(broadcaster.clone()),
        );
        let activation = ActivationService::new(stores.activations.clone(), config.expiry);
        let settlement = Settlement::new(activation, notifier.clone(), admins);

        let payments = PaymentService::new(
            stores.payments.clone(),
            stores.activations.clone(),
            Arc::new(config.dispatcher),
            config.stripe.map(Arc::new),
            settlement.clone(),
        );
        let reconciler = Reconciler::new(stores.payments.clone(), settlement);

        Ok(Self {
            stores,
            payments,
            reconciler,
            notifier,
            broadcaster,
            stripe_webhook_secret: config.stripe_webhook_secret.map(Arc::from),
            delivery_log_retention: config.delivery_log_retention,
        })
    }
}
