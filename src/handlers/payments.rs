//! Payment HTTP handlers.
//!
//! - POST /api/v1/payments - Start a payment (free, card or mobile money)
//! - GET /api/v1/payments - List the caller's payment attempts
//! - GET /api/v1/payments/{id} - Poll one attempt

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::payment::{CreatePaymentRequest, PaymentView};
use crate::state::AppState;

/// Create a payment attempt.
///
/// # Request Body
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
///
/// # Response
///
/// - **201 Created**: `{status, data, message}`; pending attempts complete through a provider callback
/// - **400**: validation error with the offending `field`
/// - **402**: the provider declined the payment (nothing persisted)
/// - **403**: payout requested by a non-admin
pub async fn create_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state.payments.create_payment(&auth, request).await?;

    Ok((StatusCode::CREATED, Json(created.response)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// List the caller's payment attempts, newest first.
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PaymentView>>, AppError> {
    let payments = state.payments.list_payments(auth.user_id, query.limit).await?;

    Ok(Json(payments.into_iter().map(PaymentView::from).collect()))
}

/// Get one payment attempt. Returns 404 for attempts owned by someone else.
pub async fn get_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentView>, AppError> {
    let payment = state.payments.get_payment(auth.user_id, payment_id).await?;

    Ok(Json(payment.into()))
}
