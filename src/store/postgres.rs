use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use uuid::Uuid;

use super::{
    ActivationStore, ApiKeyStore, PaymentStore, PushSubscriptionStore, StoreError, StoreResult,
    SubscriptionChanges, WebhookStore,
};
use crate::db::DbPool;
use crate::models::api_key::ApiKey;
use crate::models::payment::{
    NewPaymentAttempt, PaymentAttempt, PaymentRow, PaymentStatus, PaymentTarget,
};
use crate::models::push::PushSubscription;
use crate::models::webhook::{
    DeliveryLog, NewDeliveryLog, NewWebhookSubscription, WebhookEvent, WebhookSubscription,
    WebhookSubscriptionRow,
};

const PAYMENT_COLUMNS: &str = "id, transaction_reference, provider_reference, owner_user_id, \
     package_name, payment_method, direction, phone, amount_cents, card_details, status, \
     provider_response, target_kind, target_id, target_weeks, created_at, paid_at";

const SUBSCRIPTION_COLUMNS: &str = "id, owner_user_id, target_url, events, signing_secret, \
     active, total_sent, total_succeeded, total_failed, last_sent_at, created_at";

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn payment_from_row(row: PaymentRow) -> StoreResult<PaymentAttempt> {
    Ok(PaymentAttempt::try_from(row)?)
}

fn subscription_from_row(row: WebhookSubscriptionRow) -> StoreResult<WebhookSubscription> {
    Ok(WebhookSubscription::try_from(row)?)
}

fn event_names(events: &[WebhookEvent]) -> Vec<String> {
    events.iter().map(|e| e.as_str().to_string()).collect()
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, payment: NewPaymentAttempt) -> StoreResult<PaymentAttempt> {
        let (target_kind, target_id, target_weeks) = payment.target.to_columns();
        let result = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payment_attempts (
                transaction_reference, provider_reference, owner_user_id, package_name,
                payment_method, direction, phone, amount_cents, card_details, status,
                provider_response, target_kind, target_id, target_weeks, paid_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(&payment.transaction_reference)
        .bind(&payment.provider_reference)
        .bind(payment.owner_user_id)
        .bind(&payment.package_name)
        .bind(payment.payment_method.as_str())
        .bind(payment.direction.as_str())
        .bind(&payment.phone)
        .bind(payment.amount_cents)
        .bind(payment.card_details.clone().map(Json))
        .bind(payment.status.as_str())
        .bind(&payment.provider_response)
        .bind(target_kind)
        .bind(target_id)
        .bind(target_weeks)
        .bind(payment.paid_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => payment_from_row(row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::DuplicateReference(payment.transaction_reference),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_payment(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<PaymentAttempt>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_attempts WHERE id = $1 AND owner_user_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.map(payment_from_row).transpose()
    }

    async fn list_payments(&self, owner: Uuid, limit: i64) -> StoreResult<Vec<PaymentAttempt>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_attempts WHERE owner_user_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(payment_from_row).collect()
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<PaymentAttempt>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_attempts \
             WHERE transaction_reference = $1 OR provider_reference = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(payment_from_row).transpose()
    }

    async fn complete_pending(
        &self,
        id: Uuid,
        status: PaymentStatus,
        callback: JsonValue,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PaymentAttempt>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            UPDATE payment_attempts
            SET status = $2,
                paid_at = $3,
                provider_response = provider_response || jsonb_build_object('callback', $4::jsonb)
            WHERE id = $1 AND status = 'pending'
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(paid_at)
        .bind(callback)
        .fetch_optional(&self.pool)
        .await?;
        row.map(payment_from_row).transpose()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookStore for PgStore {
    async fn create_subscription(
        &self,
        subscription: NewWebhookSubscription,
    ) -> StoreResult<WebhookSubscription> {
        let row = sqlx::query_as::<_, WebhookSubscriptionRow>(&format!(
            r#"
            INSERT INTO webhook_subscriptions (owner_user_id, target_url, events, signing_secret)
            VALUES ($1, $2, $3, $4)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(subscription.owner_user_id)
        .bind(&subscription.target_url)
        .bind(event_names(&subscription.events))
        .bind(&subscription.signing_secret)
        .fetch_one(&self.pool)
        .await?;
        subscription_from_row(row)
    }

    async fn list_subscriptions(&self, owner: Uuid) -> StoreResult<Vec<WebhookSubscription>> {
        let rows = sqlx::query_as::<_, WebhookSubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
             WHERE owner_user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(subscription_from_row).collect()
    }

    async fn find_subscription(
        &self,
        owner: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookSubscription>> {
        let row = sqlx::query_as::<_, WebhookSubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
             WHERE id = $1 AND owner_user_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.map(subscription_from_row).transpose()
    }

    async fn update_subscription(
        &self,
        owner: Uuid,
        id: Uuid,
        changes: SubscriptionChanges,
    ) -> StoreResult<Option<WebhookSubscription>> {
        let row = sqlx::query_as::<_, WebhookSubscriptionRow>(&format!(
            r#"
            UPDATE webhook_subscriptions
            SET target_url = COALESCE($3, target_url),
                events = COALESCE($4, events),
                active = COALESCE($5, active)
            WHERE id = $1 AND owner_user_id = $2
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(changes.target_url)
        .bind(changes.events.as_deref().map(event_names))
        .bind(changes.active)
        .fetch_optional(&self.pool)
        .await?;
        row.map(subscription_from_row).transpose()
    }

    async fn delete_subscription(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1 AND owner_user_id = $2")
                .bind(id)
                .bind(owner)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_subscriptions_for(
        &self,
        owner: Uuid,
        event: WebhookEvent,
    ) -> StoreResult<Vec<WebhookSubscription>> {
        let rows = sqlx::query_as::<_, WebhookSubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
             WHERE owner_user_id = $1 AND active = true AND $2 = ANY(events)"
        ))
        .bind(owner)
        .bind(event.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(subscription_from_row).collect()
    }

    async fn record_delivery_outcome(
        &self,
        id: Uuid,
        succeeded: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET total_sent = total_sent + 1,
                total_succeeded = total_succeeded + CASE WHEN $2 THEN 1 ELSE 0 END,
                total_failed = total_failed + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_sent_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(succeeded)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_delivery_log(&self, log: NewDeliveryLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_delivery_logs (
                subscription_id, owner_user_id, event, target_url, payload, attempt_number,
                response_status_code, response_body_excerpt, succeeded, error_message,
                response_time_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(log.subscription_id)
        .bind(log.owner_user_id)
        .bind(log.event.as_str())
        .bind(&log.target_url)
        .bind(&log.payload)
        .bind(log.attempt_number)
        .bind(log.response_status_code)
        .bind(&log.response_body_excerpt)
        .bind(log.succeeded)
        .bind(&log.error_message)
        .bind(log.response_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_delivery_logs(
        &self,
        owner: Uuid,
        subscription_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DeliveryLog>> {
        let logs = sqlx::query_as::<_, DeliveryLog>(
            r#"
            SELECT id, subscription_id, owner_user_id, event, target_url, payload,
                   attempt_number, response_status_code, response_body_excerpt, succeeded,
                   error_message, response_time_ms, created_at
            FROM webhook_delivery_logs
            WHERE owner_user_id = $1 AND subscription_id = $2 AND created_at >= $3
            ORDER BY created_at DESC
            LIMIT 500
            "#,
        )
        .bind(owner)
        .bind(subscription_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn purge_delivery_logs(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM webhook_delivery_logs WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ActivationStore for PgStore {
    async fn owns_target(&self, owner: Uuid, target: &PaymentTarget) -> StoreResult<bool> {
        let query = match target {
            PaymentTarget::Ad { ad_id, .. } => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM ads WHERE id = $1 AND owner_user_id = $2)",
                )
                .bind(*ad_id)
            }
            PaymentTarget::TalentListing { listing_id } => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM talent_listings \
                     WHERE id = $1 AND owner_user_id = $2)",
                )
                .bind(*listing_id)
            }
            PaymentTarget::None | PaymentTarget::Subscription => return Ok(true),
        };
        Ok(query.bind(owner).fetch_one(&self.pool).await?)
    }

    async fn activate_ad(
        &self,
        owner: Uuid,
        ad_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE ads SET status = 'active', expires_at = $2, updated_at = NOW() \
             WHERE id = $1 AND owner_user_id = $3",
        )
        .bind(ad_id)
        .bind(expires_at)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn activate_plan(
        &self,
        user_id: Uuid,
        plan: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_subscriptions (user_id, plan, status, expires_at)
            VALUES ($1, $2, 'active', $3)
            ON CONFLICT (user_id) DO UPDATE
            SET plan = EXCLUDED.plan, status = 'active', expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(plan)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn activate_talent_listing(
        &self,
        owner: Uuid,
        listing_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE talent_listings SET status = 'active', expires_at = $2, updated_at = NOW() \
             WHERE id = $1 AND owner_user_id = $3",
        )
        .bind(listing_id)
        .bind(expires_at)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PushSubscriptionStore for PgStore {
    async fn upsert_push_subscription(
        &self,
        user_id: Uuid,
        role: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> StoreResult<PushSubscription> {
        let subscription = sqlx::query_as::<_, PushSubscription>(
            r#"
            INSERT INTO push_subscriptions (user_id, role, endpoint, p256dh, auth)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (endpoint) DO UPDATE
            SET user_id = EXCLUDED.user_id, role = EXCLUDED.role,
                p256dh = EXCLUDED.p256dh, auth = EXCLUDED.auth
            RETURNING id, user_id, role, endpoint, p256dh, auth, created_at
            "#,
        )
        .bind(user_id)
        .bind(role)
        .bind(endpoint)
        .bind(p256dh)
        .bind(auth)
        .fetch_one(&self.pool)
        .await?;
        Ok(subscription)
    }

    async fn admin_push_subscriptions(&self) -> StoreResult<Vec<PushSubscription>> {
        let subscriptions = sqlx::query_as::<_, PushSubscription>(
            "SELECT id, user_id, role, endpoint, p256dh, auth, created_at \
             FROM push_subscriptions WHERE role = 'admin'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    async fn delete_push_subscription(&self, endpoint: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = $1")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn find_active_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(
            "SELECT id, key_hash, user_id, role, created_at, is_active \
             FROM api_keys WHERE key_hash = $1 AND is_active = true",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }
}
