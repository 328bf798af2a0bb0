//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Calls into the services
//! 3. Returns HTTP response (JSON, status code)

/// Admin real-time event stream
pub mod admin;
/// Provider callback endpoints
pub mod callbacks;
pub mod health;
/// Payment endpoints
pub mod payments;
pub mod push;
/// Outbound webhook management endpoints
pub mod webhooks;
