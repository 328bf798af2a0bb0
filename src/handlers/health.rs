//! Liveness and readiness probe.

use crate::{error::AppError, state::AppState};
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,

    /// Store reachability
    pub store: &'static str,

    /// Registered payment rails (`mpesa/c2b`, `emola/b2c`, `card`, ...)
    pub rails: Vec<String>,

    pub timestamp: DateTime<Utc>,
}

/// `GET /health`
///
/// ```json
/// {
///   "status": "healthy",
///   "store": "connected",
///   "rails": ["mpesa/c2b", "mpesa/b2c"],
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// An unreachable store surfaces as the standard 500 error body.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.stores.payments.ping().await?;

    Ok(Json(HealthResponse {
        status: "healthy",
        store: "connected",
        rails: state.payments.rails(),
        timestamp: Utc::now(),
    }))
}
