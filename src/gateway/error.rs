use thiserror::Error;

use super::types::{Direction, ProviderName};

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Provider not configured: provider={provider}, direction={direction}")]
    NotConfigured {
        provider: ProviderName,
        direction: Direction,
    },

    #[error("Credential error: provider={provider}, message={message}")]
    Credential { provider: String, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Malformed callback: {message}")]
    MalformedCallback { message: String },

    #[error("Signature verification failed: {message}")]
    SignatureVerification { message: String },
}

impl GatewayError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn credential(provider: &str, message: impl Into<String>) -> Self {
        GatewayError::Credential {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Transport failures may succeed if the caller tries again later;
    /// everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Network { .. })
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::Validation { .. } => 400,
            GatewayError::NotConfigured { .. } => 400,
            GatewayError::Credential { .. } => 502,
            GatewayError::Network { .. } => 503,
            GatewayError::MalformedCallback { .. } => 400,
            GatewayError::SignatureVerification { .. } => 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(GatewayError::validation("phone", "bad").http_status_code(), 400);
        assert_eq!(GatewayError::credential("mpesa", "bad key").http_status_code(), 502);
        assert_eq!(
            GatewayError::NotConfigured {
                provider: ProviderName::Emola,
                direction: Direction::B2c
            }
            .to_string(),
            "Provider not configured: provider=emola, direction=b2c"
        );
    }

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(GatewayError::Network { message: "reset".into() }.is_retryable());
        assert!(!GatewayError::validation("amount", "negative").is_retryable());
    }
}
