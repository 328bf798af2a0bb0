//! Browser push subscription registration.

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::push::PushSubscriptionRequest;
use crate::state::AppState;

/// `POST /api/v1/push/subscriptions`
///
/// Registers (or re-owns) a push endpoint for the caller. Subscriptions of
/// admin callers receive payment notifications.
pub async fn register_push_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PushSubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let endpoint = url::Url::parse(&request.endpoint)
        .map_err(|_| AppError::validation("endpoint", "endpoint must be a valid URL"))?;
    if endpoint.scheme() != "https" {
        return Err(AppError::validation("endpoint", "push endpoints must use https"));
    }
    if request.keys.p256dh.is_empty() || request.keys.auth.is_empty() {
        return Err(AppError::validation("keys", "p256dh and auth keys are required"));
    }

    let subscription = state
        .stores
        .push
        .upsert_push_subscription(
            auth.user_id,
            auth.role.as_str(),
            &request.endpoint,
            &request.keys.p256dh,
            &request.keys.auth,
        )
        .await?;
    info!(user_id = %auth.user_id, role = %subscription.role, "push subscription registered");

    Ok((StatusCode::CREATED, Json(subscription)))
}
