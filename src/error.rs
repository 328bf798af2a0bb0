//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Persistence Errors**: Any store failure on a synchronous request path
/// - **Authentication Errors**: Invalid or missing API keys, missing role
/// - **Resource Errors**: Requested resources not found
/// - **Payment Errors**: Provider declined or is unreachable
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Store operation failed (connection error, query error, corrupt row).
    #[error("Database error: {0}")]
    Database(#[from] StoreError),

    /// API key is missing, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Caller is authenticated but lacks the required role.
    ///
    /// Returns HTTP 403 Forbidden.
    #[error("Forbidden")]
    Forbidden,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Webhook not found")]
    WebhookNotFound,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request with the offending field when known.
    #[error("{message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("Invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),

    /// Provider declined the payment or could not be reached.
    ///
    /// Returns HTTP 402 Payment Required.
    #[error("{0}")]
    PaymentFailed(String),

    /// Provider is misconfigured on our side (bad key, unreadable credentials).
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Validation { field, message } => AppError::Validation { field, message },
            GatewayError::NotConfigured { .. } => AppError::Validation {
                field: Some("method".to_string()),
                message: err.to_string(),
            },
            GatewayError::Credential { .. } => AppError::ProviderUnavailable(err.to_string()),
            GatewayError::Network { message } => AppError::PaymentFailed(message),
            GatewayError::MalformedCallback { .. } | GatewayError::SignatureVerification { .. } => {
                AppError::Validation {
                    field: None,
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message",
///     "field": "phone"
///   }
/// }
/// ```
///
/// `field` is only present for validation errors that name one.
///
/// # Status Code Mapping
///
/// - `InvalidApiKey` → 401 Unauthorized
/// - `Forbidden` → 403 Forbidden
/// - `PaymentNotFound` / `WebhookNotFound` → 404 Not Found
/// - `Validation` / `InvalidWebhookUrl` → 400 Bad Request
/// - `PaymentFailed` → 402 Payment Required
/// - `ProviderUnavailable` → 502 Bad Gateway
/// - `Database` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut field = None;
        let (status, code, message) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            AppError::PaymentNotFound => {
                (StatusCode::NOT_FOUND, "payment_not_found", self.to_string())
            }
            AppError::WebhookNotFound => {
                (StatusCode::NOT_FOUND, "webhook_not_found", self.to_string())
            }
            AppError::Validation {
                field: ref f,
                ref message,
            } => {
                field = f.clone();
                (StatusCode::BAD_REQUEST, "validation_error", message.clone())
            }
            AppError::InvalidWebhookUrl(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_webhook_url", msg.clone())
            }
            AppError::PaymentFailed(ref msg) => {
                (StatusCode::PAYMENT_REQUIRED, "payment_failed", msg.clone())
            }
            AppError::ProviderUnavailable(ref msg) => {
                tracing::error!(error = %msg, "payment provider misconfigured");
                (StatusCode::BAD_GATEWAY, "provider_unavailable", msg.clone())
            }
            AppError::Database(ref e) => {
                tracing::error!(error = %e, "store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let Some(field) = field {
            error["field"] = json!(field);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Direction, ProviderName};

    #[test]
    fn gateway_errors_map_to_http_semantics() {
        let not_configured: AppError = GatewayError::NotConfigured {
            provider: ProviderName::Emola,
            direction: Direction::C2b,
        }
        .into();
        assert_eq!(not_configured.into_response().status(), StatusCode::BAD_REQUEST);

        let credential: AppError = GatewayError::credential("mpesa", "bad key").into();
        assert_eq!(credential.into_response().status(), StatusCode::BAD_GATEWAY);

        let phone: AppError = GatewayError::validation("phone", "invalid phone number").into();
        assert!(matches!(&phone, AppError::Validation { field: Some(f), .. } if f == "phone"));
        assert_eq!(phone.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn payment_failure_is_402() {
        let err = AppError::PaymentFailed("insufficient funds".into());
        assert_eq!(err.into_response().status(), StatusCode::PAYMENT_REQUIRED);
    }
}
