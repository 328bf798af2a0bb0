//! Persistence behind narrow async traits.
//!
//! Services depend on these traits only. [`PgStore`] is the production
//! backend; [`MemoryStore`] backs local runs without a database and the test
//! suite.

mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::models::UnknownVariant;
use crate::models::api_key::ApiKey;
use crate::models::payment::{NewPaymentAttempt, PaymentAttempt, PaymentStatus, PaymentTarget};
use crate::models::push::PushSubscription;
use crate::models::webhook::{
    DeliveryLog, NewDeliveryLog, NewWebhookSubscription, WebhookEvent, WebhookSubscription,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transaction reference already used: {0}")]
    DuplicateReference(String),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] UnknownVariant),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Owner-editable subscription fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionChanges {
    pub target_url: Option<String>,
    pub events: Option<Vec<WebhookEvent>>,
    pub active: Option<bool>,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert an attempt. Fails with `DuplicateReference` when the
    /// transaction reference is already taken.
    async fn insert_payment(&self, payment: NewPaymentAttempt) -> StoreResult<PaymentAttempt>;

    async fn find_payment(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<PaymentAttempt>>;

    /// Newest first.
    async fn list_payments(&self, owner: Uuid, limit: i64) -> StoreResult<Vec<PaymentAttempt>>;

    /// Match on the transaction reference or the provider's own reference.
    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<PaymentAttempt>>;

    /// Move a pending attempt to a terminal status, recording the callback
    /// payload under `provider_response.callback`.
    ///
    /// Compare-and-set on `status = 'pending'`: returns `None` when the
    /// attempt was already settled, so concurrent callbacks apply at most once.
    async fn complete_pending(
        &self,
        id: Uuid,
        status: PaymentStatus,
        callback: JsonValue,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PaymentAttempt>>;

    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn create_subscription(
        &self,
        subscription: NewWebhookSubscription,
    ) -> StoreResult<WebhookSubscription>;

    /// Newest first.
    async fn list_subscriptions(&self, owner: Uuid) -> StoreResult<Vec<WebhookSubscription>>;

    async fn find_subscription(
        &self,
        owner: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookSubscription>>;

    async fn update_subscription(
        &self,
        owner: Uuid,
        id: Uuid,
        changes: SubscriptionChanges,
    ) -> StoreResult<Option<WebhookSubscription>>;

    /// Remove a subscription and its delivery logs. `false` when not found.
    async fn delete_subscription(&self, owner: Uuid, id: Uuid) -> StoreResult<bool>;

    /// Active subscriptions of `owner` listening to `event`.
    async fn active_subscriptions_for(
        &self,
        owner: Uuid,
        event: WebhookEvent,
    ) -> StoreResult<Vec<WebhookSubscription>>;

    /// Bump `total_sent` and either `total_succeeded` or `total_failed`,
    /// and set `last_sent_at`.
    async fn record_delivery_outcome(
        &self,
        id: Uuid,
        succeeded: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn append_delivery_log(&self, log: NewDeliveryLog) -> StoreResult<()>;

    /// Logs created at or after `since`, newest first.
    async fn list_delivery_logs(
        &self,
        owner: Uuid,
        subscription_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DeliveryLog>>;

    /// Delete logs created before `before`, returning how many were removed.
    async fn purge_delivery_logs(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

/// Side effects of an approved payment.
#[async_trait]
pub trait ActivationStore: Send + Sync {
    /// Whether `owner` may buy `target`. Ads and talent listings must exist
    /// and belong to `owner`; plans and empty targets always qualify.
    async fn owns_target(&self, owner: Uuid, target: &PaymentTarget) -> StoreResult<bool>;

    /// `false` when `owner` has no such ad.
    async fn activate_ad(
        &self,
        owner: Uuid,
        ad_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Create or extend the user's plan subscription.
    async fn activate_plan(
        &self,
        user_id: Uuid,
        plan: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// `false` when `owner` has no such listing.
    async fn activate_talent_listing(
        &self,
        owner: Uuid,
        listing_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait PushSubscriptionStore: Send + Sync {
    /// Insert, or re-point an existing endpoint at `user_id`.
    async fn upsert_push_subscription(
        &self,
        user_id: Uuid,
        role: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> StoreResult<PushSubscription>;

    async fn admin_push_subscriptions(&self) -> StoreResult<Vec<PushSubscription>>;

    async fn delete_push_subscription(&self, endpoint: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_active_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>>;
}

/// Handles to every store, shared by services and handlers.
#[derive(Clone)]
pub struct Stores {
    pub payments: Arc<dyn PaymentStore>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub activations: Arc<dyn ActivationStore>,
    pub push: Arc<dyn PushSubscriptionStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: PaymentStore
            + WebhookStore
            + ActivationStore
            + PushSubscriptionStore
            + ApiKeyStore
            + 'static,
    {
        Self {
            payments: backend.clone(),
            webhooks: backend.clone(),
            activations: backend.clone(),
            push: backend.clone(),
            api_keys: backend,
        }
    }
}
