//! HTTP router.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

/// Build the full router: authenticated API, public provider callbacks and
/// the health check.
pub fn router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        // Payment routes
        .route(
            "/api/v1/payments",
            post(handlers::payments::create_payment).get(handlers::payments::list_payments),
        )
        .route("/api/v1/payments/{id}", get(handlers::payments::get_payment))
        // Webhook routes
        .route(
            "/api/v1/webhooks",
            post(handlers::webhooks::create_webhook).get(handlers::webhooks::list_webhooks),
        )
        .route(
            "/api/v1/webhooks/{id}",
            get(handlers::webhooks::get_webhook)
                .patch(handlers::webhooks::update_webhook)
                .delete(handlers::webhooks::delete_webhook),
        )
        .route(
            "/api/v1/webhooks/{id}/deliveries",
            get(handlers::webhooks::list_deliveries),
        )
        .route("/api/v1/webhooks/{id}/test", post(handlers::webhooks::test_webhook))
        // Push and admin routes
        .route(
            "/api/v1/push/subscriptions",
            post(handlers::push::register_push_subscription),
        )
        .route("/api/v1/admin/events", get(handlers::admin::admin_events))
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .route("/callbacks/mpesa", post(handlers::callbacks::mpesa_callback))
        .route("/callbacks/emola", post(handlers::callbacks::emola_callback))
        .route("/callbacks/stripe", post(handlers::callbacks::stripe_callback))
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
