//! Data models representing persisted records and API payloads.
//!
//! Rows are read from the database with string columns and converted into
//! typed domain records, so an unknown enum spelling surfaces as an
//! [`UnknownVariant`] instead of silently drifting between layers.

/// API key authentication model
pub mod api_key;
/// Payment attempts and their lifecycle
pub mod payment;
/// Admin browser push subscriptions
pub mod push;
/// Outbound webhook subscriptions and delivery logs
pub mod webhook;

/// A stored or submitted string did not match any known variant of an enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
