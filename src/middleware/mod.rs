//! Request middleware.
//!
//! Only the `/api/v1` routes are layered with [`auth::auth_middleware`];
//! provider callbacks and `/health` stay public.

pub mod auth;
