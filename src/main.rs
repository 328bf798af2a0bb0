//! Recovery Payments Server - Main Application Entry Point
//!
//! REST API server for the payment core of the document recovery platform:
//! M-Pesa, eMola and card payments, provider callbacks, outbound webhooks and
//! admin notifications.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Open the store (PostgreSQL with migrations, or in-memory without `DATABASE_URL`)
//! 3. Purge expired webhook delivery logs
//! 4. Register configured providers and build the router
//! 5. Start server on configured port

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use recovery_payments_server::{
    app,
    config::Config,
    db,
    gateway::{GatewayDispatcher, stripe::StripeClient},
    middleware::auth::hash_api_key,
    models::api_key::Role,
    services::{
        admin_notifier::{PushService, VapidPushService},
        webhook_service::retention_cutoff,
    },
    state::{AppState, StateConfig},
    store::{MemoryStore, PgStore, Stores},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let stores = match &config.database_url {
        Some(database_url) => {
            let pool = db::create_pool(database_url, config.db_max_connections).await?;
            tracing::info!(max_connections = config.db_max_connections, "Database pool created");
            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");
            Stores::from_backend(Arc::new(PgStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            let store = Arc::new(MemoryStore::new());
            if let Some(key) = &config.dev_api_key {
                let api_key = store
                    .insert_api_key(hash_api_key(key), uuid::Uuid::new_v4(), Role::Admin)
                    .await;
                tracing::info!(user_id = %api_key.user_id, "development admin key registered");
            }
            Stores::from_backend(store)
        }
    };

    let retention = config.delivery_log_retention();
    match stores
        .webhooks
        .purge_delivery_logs(retention_cutoff(retention))
        .await
    {
        Ok(purged) => tracing::info!(purged, "expired delivery logs purged"),
        Err(e) => tracing::warn!(error = %e, "failed to purge delivery logs"),
    }

    let mpesa = config.mpesa();
    let emola = config.emola();
    let dispatcher = GatewayDispatcher::from_config(mpesa.as_ref(), emola.as_ref())
        .context("invalid mobile-money provider configuration")?;

    let stripe_config = config.stripe();
    let stripe = stripe_config
        .as_ref()
        .map(StripeClient::new)
        .transpose()
        .context("invalid Stripe configuration")?;

    let push = match &config.vapid_private_key_pem {
        Some(pem) => {
            let service = VapidPushService::new(pem.clone(), config.vapid_subject.clone())
                .context("failed to initialize web push")?;
            Some(Arc::new(service) as Arc<dyn PushService>)
        }
        None => None,
    };

    let state = AppState::new(
        stores,
        StateConfig {
            dispatcher,
            stripe,
            stripe_webhook_secret: stripe_config.map(|s| s.webhook_secret),
            notifier: config.notifier(),
            expiry: config.expiry_policy(),
            push,
            delivery_log_retention: retention,
        },
    )?;
    let app = app::router(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
