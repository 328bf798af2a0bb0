use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ActivationStore, ApiKeyStore, PaymentStore, PushSubscriptionStore, StoreError, StoreResult,
    SubscriptionChanges, WebhookStore,
};
use crate::models::api_key::{ApiKey, Role};
use crate::models::payment::{NewPaymentAttempt, PaymentAttempt, PaymentStatus, PaymentTarget};
use crate::models::push::PushSubscription;
use crate::models::webhook::{
    DeliveryLog, NewDeliveryLog, NewWebhookSubscription, WebhookEvent, WebhookSubscription,
};

/// Activation state of an ad or talent listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingState {
    pub owner_user_id: Uuid,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A user's plan subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanState {
    pub plan: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    payments: Vec<PaymentAttempt>,
    subscriptions: Vec<WebhookSubscription>,
    delivery_logs: Vec<DeliveryLog>,
    push_subscriptions: Vec<PushSubscription>,
    api_keys: Vec<ApiKey>,
    ads: HashMap<Uuid, ListingState>,
    talent_listings: HashMap<Uuid, ListingState>,
    plans: HashMap<Uuid, PlanState>,
}

/// In-process store for running without Postgres and for tests.
///
/// Holds a single lock per operation, which gives the same
/// compare-and-set guarantee as the conditional `UPDATE` in Postgres.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

fn merge_callback(response: &mut JsonValue, callback: JsonValue) {
    match response {
        JsonValue::Object(map) => {
            map.insert("callback".to_string(), callback);
        }
        other => {
            *other = serde_json::json!({ "initial": other.take(), "callback": callback });
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an API key by its SHA-256 hash.
    pub async fn insert_api_key(&self, key_hash: String, user_id: Uuid, role: Role) -> ApiKey {
        let key = ApiKey {
            id: Uuid::new_v4(),
            key_hash,
            user_id,
            role: role.as_str().to_string(),
            created_at: Utc::now(),
            is_active: true,
        };
        self.state.write().await.api_keys.push(key.clone());
        key
    }

    /// Create an inactive ad owned by `owner`.
    pub async fn seed_ad(&self, owner: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.ads.insert(
            id,
            ListingState {
                owner_user_id: owner,
                status: "draft".to_string(),
                expires_at: None,
            },
        );
        id
    }

    /// Create an inactive talent listing owned by `owner`.
    pub async fn seed_talent_listing(&self, owner: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.talent_listings.insert(
            id,
            ListingState {
                owner_user_id: owner,
                status: "draft".to_string(),
                expires_at: None,
            },
        );
        id
    }

    pub async fn ad(&self, id: Uuid) -> Option<ListingState> {
        self.state.read().await.ads.get(&id).cloned()
    }

    pub async fn talent_listing(&self, id: Uuid) -> Option<ListingState> {
        self.state.read().await.talent_listings.get(&id).cloned()
    }

    pub async fn plan(&self, user_id: Uuid) -> Option<PlanState> {
        self.state.read().await.plans.get(&user_id).cloned()
    }

    pub async fn payments(&self) -> Vec<PaymentAttempt> {
        self.state.read().await.payments.clone()
    }

    pub async fn delivery_logs(&self) -> Vec<DeliveryLog> {
        self.state.read().await.delivery_logs.clone()
    }

    pub async fn subscription(&self, id: Uuid) -> Option<WebhookSubscription> {
        self.state
            .read()
            .await
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub async fn push_subscriptions(&self) -> Vec<PushSubscription> {
        self.state.read().await.push_subscriptions.clone()
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: NewPaymentAttempt) -> StoreResult<PaymentAttempt> {
        let mut state = self.state.write().await;
        if state
            .payments
            .iter()
            .any(|p| p.transaction_reference == payment.transaction_reference)
        {
            return Err(StoreError::DuplicateReference(payment.transaction_reference));
        }

        let attempt = PaymentAttempt {
            id: Uuid::new_v4(),
            transaction_reference: payment.transaction_reference,
            provider_reference: payment.provider_reference,
            owner_user_id: payment.owner_user_id,
            package_name: payment.package_name,
            payment_method: payment.payment_method,
            direction: payment.direction,
            phone: payment.phone,
            amount_cents: payment.amount_cents,
            card_details: payment.card_details,
            status: payment.status,
            provider_response: payment.provider_response,
            target: payment.target,
            created_at: Utc::now(),
            paid_at: payment.paid_at,
        };
        state.payments.push(attempt.clone());
        Ok(attempt)
    }

    async fn find_payment(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<PaymentAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.id == id && p.owner_user_id == owner)
            .cloned())
    }

    async fn list_payments(&self, owner: Uuid, limit: i64) -> StoreResult<Vec<PaymentAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .rev()
            .filter(|p| p.owner_user_id == owner)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<PaymentAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .rev()
            .find(|p| {
                p.transaction_reference == reference
                    || p.provider_reference.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn complete_pending(
        &self,
        id: Uuid,
        status: PaymentStatus,
        callback: JsonValue,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PaymentAttempt>> {
        let mut state = self.state.write().await;
        let Some(payment) = state
            .payments
            .iter_mut()
            .find(|p| p.id == id && p.status == PaymentStatus::Pending)
        else {
            return Ok(None);
        };
        payment.status = status;
        payment.paid_at = paid_at;
        merge_callback(&mut payment.provider_response, callback);
        Ok(Some(payment.clone()))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn create_subscription(
        &self,
        subscription: NewWebhookSubscription,
    ) -> StoreResult<WebhookSubscription> {
        let created = WebhookSubscription {
            id: Uuid::new_v4(),
            owner_user_id: subscription.owner_user_id,
            target_url: subscription.target_url,
            events: subscription.events,
            signing_secret: subscription.signing_secret,
            active: true,
            total_sent: 0,
            total_succeeded: 0,
            total_failed: 0,
            last_sent_at: None,
            created_at: Utc::now(),
        };
        self.state.write().await.subscriptions.push(created.clone());
        Ok(created)
    }

    async fn list_subscriptions(&self, owner: Uuid) -> StoreResult<Vec<WebhookSubscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .rev()
            .filter(|s| s.owner_user_id == owner)
            .cloned()
            .collect())
    }

    async fn find_subscription(
        &self,
        owner: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookSubscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.id == id && s.owner_user_id == owner)
            .cloned())
    }

    async fn update_subscription(
        &self,
        owner: Uuid,
        id: Uuid,
        changes: SubscriptionChanges,
    ) -> StoreResult<Option<WebhookSubscription>> {
        let mut state = self.state.write().await;
        let Some(subscription) = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id && s.owner_user_id == owner)
        else {
            return Ok(None);
        };
        if let Some(url) = changes.target_url {
            subscription.target_url = url;
        }
        if let Some(events) = changes.events {
            subscription.events = events;
        }
        if let Some(active) = changes.active {
            subscription.active = active;
        }
        Ok(Some(subscription.clone()))
    }

    async fn delete_subscription(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.subscriptions.len();
        state
            .subscriptions
            .retain(|s| !(s.id == id && s.owner_user_id == owner));
        let removed = state.subscriptions.len() < before;
        if removed {
            state.delivery_logs.retain(|log| log.subscription_id != id);
        }
        Ok(removed)
    }

    async fn active_subscriptions_for(
        &self,
        owner: Uuid,
        event: WebhookEvent,
    ) -> StoreResult<Vec<WebhookSubscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.owner_user_id == owner && s.listens_to(event))
            .cloned()
            .collect())
    }

    async fn record_delivery_outcome(
        &self,
        id: Uuid,
        succeeded: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(subscription) = state.subscriptions.iter_mut().find(|s| s.id == id) {
            subscription.total_sent += 1;
            if succeeded {
                subscription.total_succeeded += 1;
            } else {
                subscription.total_failed += 1;
            }
            subscription.last_sent_at = Some(at);
        }
        Ok(())
    }

    async fn append_delivery_log(&self, log: NewDeliveryLog) -> StoreResult<()> {
        self.state.write().await.delivery_logs.push(DeliveryLog {
            id: Uuid::new_v4(),
            subscription_id: log.subscription_id,
            owner_user_id: log.owner_user_id,
            event: log.event.as_str().to_string(),
            target_url: log.target_url,
            payload: log.payload,
            attempt_number: log.attempt_number,
            response_status_code: log.response_status_code,
            response_body_excerpt: log.response_body_excerpt,
            succeeded: log.succeeded,
            error_message: log.error_message,
            response_time_ms: log.response_time_ms,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_delivery_logs(
        &self,
        owner: Uuid,
        subscription_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DeliveryLog>> {
        let state = self.state.read().await;
        Ok(state
            .delivery_logs
            .iter()
            .rev()
            .filter(|log| {
                log.owner_user_id == owner
                    && log.subscription_id == subscription_id
                    && log.created_at >= since
            })
            .cloned()
            .collect())
    }

    async fn purge_delivery_logs(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let count = state.delivery_logs.len();
        state.delivery_logs.retain(|log| log.created_at >= before);
        Ok((count - state.delivery_logs.len()) as u64)
    }
}

#[async_trait]
impl ActivationStore for MemoryStore {
    async fn owns_target(&self, owner: Uuid, target: &PaymentTarget) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(match target {
            PaymentTarget::Ad { ad_id, .. } => state
                .ads
                .get(ad_id)
                .is_some_and(|ad| ad.owner_user_id == owner),
            PaymentTarget::TalentListing { listing_id } => state
                .talent_listings
                .get(listing_id)
                .is_some_and(|listing| listing.owner_user_id == owner),
            PaymentTarget::None | PaymentTarget::Subscription => true,
        })
    }

    async fn activate_ad(
        &self,
        owner: Uuid,
        ad_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.ads.get_mut(&ad_id) {
            Some(ad) if ad.owner_user_id == owner => {
                ad.status = "active".to_string();
                ad.expires_at = Some(expires_at);
                true
            }
            _ => false,
        })
    }

    async fn activate_plan(
        &self,
        user_id: Uuid,
        plan: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.state.write().await.plans.insert(
            user_id,
            PlanState {
                plan: plan.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn activate_talent_listing(
        &self,
        owner: Uuid,
        listing_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.talent_listings.get_mut(&listing_id) {
            Some(listing) if listing.owner_user_id == owner => {
                listing.status = "active".to_string();
                listing.expires_at = Some(expires_at);
                true
            }
            _ => false,
        })
    }
}

#[async_trait]
impl PushSubscriptionStore for MemoryStore {
    async fn upsert_push_subscription(
        &self,
        user_id: Uuid,
        role: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> StoreResult<PushSubscription> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .push_subscriptions
            .iter_mut()
            .find(|s| s.endpoint == endpoint)
        {
            existing.user_id = user_id;
            existing.role = role.to_string();
            existing.p256dh = p256dh.to_string();
            existing.auth = auth.to_string();
            return Ok(existing.clone());
        }

        let subscription = PushSubscription {
            id: Uuid::new_v4(),
            user_id,
            role: role.to_string(),
            endpoint: endpoint.to_string(),
            p256dh: p256dh.to_string(),
            auth: auth.to_string(),
            created_at: Utc::now(),
        };
        state.push_subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn admin_push_subscriptions(&self) -> StoreResult<Vec<PushSubscription>> {
        let state = self.state.read().await;
        Ok(state
            .push_subscriptions
            .iter()
            .filter(|s| s.role == Role::Admin.as_str())
            .cloned()
            .collect())
    }

    async fn delete_push_subscription(&self, endpoint: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.push_subscriptions.len();
        state.push_subscriptions.retain(|s| s.endpoint != endpoint);
        Ok(state.push_subscriptions.len() < before)
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn find_active_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let state = self.state.read().await;
        Ok(state
            .api_keys
            .iter()
            .find(|k| k.key_hash == key_hash && k.is_active)
            .cloned())
    }
}
