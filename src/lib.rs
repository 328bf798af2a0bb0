//! Payment core of the document recovery platform.
//!
//! Dispatches payments to mobile-money and card providers, reconciles their
//! asynchronous callbacks, activates what was paid for, and notifies
//! subscribers and admins.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
