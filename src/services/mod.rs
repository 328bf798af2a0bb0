//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They talk to stores and providers, never to HTTP request types.

pub mod activation;
pub mod admin_notifier;
pub mod payment_service;
pub mod reconciliation;
pub mod settlement;
pub mod webhook_service;
