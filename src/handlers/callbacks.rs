//! Public provider callback endpoints.
//!
//! Mobile-money gateways retry any non-2xx answer, so these handlers always
//! acknowledge with 200 and the provider's minimal body. Unknown references,
//! duplicates and internal errors are logged, never surfaced. The Stripe
//! endpoint is the exception: an unverifiable signature is rejected with 400.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::gateway::{ProviderCallback, emola, mpesa, stripe};
use crate::services::reconciliation::ReconcileOutcome;
use crate::state::AppState;

/// Ack code sent to eMola when the callback could not be read at all.
const EMOLA_UNREADABLE_CODE: &str = "1";

async fn reconcile(state: &AppState, callback: ProviderCallback) {
    let source = callback.source;
    let reference = callback.reference.clone();
    match state.reconciler.reconcile(callback).await {
        Ok(ReconcileOutcome::Applied { payment, .. }) => {
            info!(%source, %reference, status = %payment.status, "callback applied");
        }
        Ok(ReconcileOutcome::Unmatched | ReconcileOutcome::AlreadySettled) => {}
        Err(e) => {
            error!(%source, %reference, error = %e, "callback reconciliation failed");
        }
    }
}

/// `POST /callbacks/mpesa`
///
/// ```json
/// { "output_ThirdPartyReference": "MP1734690000000AB12C", "output_ResponseCode": "INS-0" }
/// ```
///
/// Always answers `{"status": "ok"}`.
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match mpesa::parse_callback(&body) {
        Ok(callback) => reconcile(&state, callback).await,
        Err(e) => warn!(error = %e, "unreadable M-Pesa callback"),
    }

    Json(json!({ "status": "ok" }))
}

/// `POST /callbacks/emola`
///
/// Answers with a SOAP envelope echoing the received `errorCode` and `transId`.
pub async fn emola_callback(State(state): State<AppState>, body: String) -> impl IntoResponse {
    let ack = match emola::parse_callback(&body) {
        Ok(callback) => {
            let trans_id = callback
                .raw
                .get("transId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let code = callback.code.clone();
            reconcile(&state, callback).await;
            emola::callback_ack(&code, trans_id.as_deref())
        }
        Err(e) => {
            warn!(error = %e, "unreadable eMola callback");
            emola::callback_ack(EMOLA_UNREADABLE_CODE, None)
        }
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        ack,
    )
}

/// `POST /callbacks/stripe`
///
/// The `Stripe-Signature` header is verified against the raw body before
/// anything else; failures get 400 so Stripe surfaces them in its dashboard.
pub async fn stripe_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(secret) = state.stripe_webhook_secret.as_deref() else {
        warn!("Stripe callback received but Stripe is not configured");
        return (StatusCode::BAD_REQUEST, Json(json!({ "received": false })));
    };

    let signature = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if let Err(e) = stripe::verify_signature(secret, signature, &body, stripe::SIGNATURE_TOLERANCE_SECS) {
        warn!(error = %e, "rejected Stripe callback");
        return (StatusCode::BAD_REQUEST, Json(json!({ "received": false })));
    }

    match stripe::parse_event(&body) {
        Ok(Some(callback)) => reconcile(&state, callback).await,
        Ok(None) => {}
        Err(e) => warn!(error = %e, "unreadable Stripe event"),
    }

    (StatusCode::OK, Json(json!({ "received": true })))
}
