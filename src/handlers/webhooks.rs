//! HTTP handlers for outbound webhook management.
//!
//! This module provides API endpoints for platform users to register,
//! inspect, edit and delete the endpoints that receive payment and
//! activation events, and to read their delivery history.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::webhook::{
    CreateWebhookRequest, DeliveryLog, UpdateWebhookRequest, WebhookSubscriptionResponse,
};
use crate::services::webhook_service::{self, AttemptResult};
use crate::state::AppState;

/// Register a new webhook subscription.
///
/// # Request Body
///
/// ```json
/// {
///   "url": "https://example.com/webhook",
///   "events": ["payment.approved", "ad.activated"]
/// }
/// ```
///
/// # Response
///
/// Returns 201 Created with the subscription details.
/// The `secret` is only returned once during creation.
///
/// # Security
///
/// - Requires valid API key authentication
/// - http or https URLs only
/// - Secret is 64-character hex string for HMAC-SHA256
pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateWebhookRequest>,
) -> Result<impl IntoResponse, AppError> {
    let subscription =
        webhook_service::create_subscription(state.stores.webhooks.as_ref(), auth.user_id, request)
            .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

/// List the caller's webhook subscriptions (secrets NOT included).
pub async fn list_webhooks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<WebhookSubscriptionResponse>>, AppError> {
    let subscriptions =
        webhook_service::list_subscriptions(state.stores.webhooks.as_ref(), auth.user_id).await?;

    Ok(Json(subscriptions))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(webhook_id): Path<Uuid>,
) -> Result<Json<WebhookSubscriptionResponse>, AppError> {
    let subscription =
        webhook_service::get_subscription(state.stores.webhooks.as_ref(), auth.user_id, webhook_id)
            .await?;

    Ok(Json(subscription.into()))
}

/// Edit url, events or active flag.
///
/// ```json
/// { "active": false }
/// ```
pub async fn update_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(webhook_id): Path<Uuid>,
    Json(request): Json<UpdateWebhookRequest>,
) -> Result<Json<WebhookSubscriptionResponse>, AppError> {
    let subscription = webhook_service::update_subscription(
        state.stores.webhooks.as_ref(),
        auth.user_id,
        webhook_id,
        request,
    )
    .await?;

    Ok(Json(subscription))
}

/// Delete a webhook subscription and its delivery logs.
///
/// # Response
///
/// Returns 204 No Content on success, 404 if the subscription does not
/// exist or belongs to someone else.
pub async fn delete_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(webhook_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    webhook_service::delete_subscription(state.stores.webhooks.as_ref(), auth.user_id, webhook_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Delivery attempts of the last 90 days, newest first.
pub async fn list_deliveries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(webhook_id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryLog>>, AppError> {
    let logs = webhook_service::list_deliveries(
        state.stores.webhooks.as_ref(),
        auth.user_id,
        webhook_id,
        state.delivery_log_retention,
    )
    .await?;

    Ok(Json(logs))
}

/// Send one signed test event and report what the endpoint answered.
///
/// ```json
/// { "succeeded": true, "status_code": 200, "response_time_ms": 42, "error": null }
/// ```
pub async fn test_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(webhook_id): Path<Uuid>,
) -> Result<Json<AttemptResult>, AppError> {
    let subscription =
        webhook_service::get_subscription(state.stores.webhooks.as_ref(), auth.user_id, webhook_id)
            .await?;

    Ok(Json(state.notifier.send_test_event(&subscription).await))
}
