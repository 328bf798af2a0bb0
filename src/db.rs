//! Postgres pool and schema migrations for the payment store.
//!
//! The pool backs every store trait in [`crate::store::PgStore`]: payment
//! attempts, webhook subscriptions and their delivery logs, push
//! subscriptions, API keys and the activation targets.

use std::time::Duration;

use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

pub type DbPool = Pool<Postgres>;

/// Upper bound on waiting for a free connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a pool of at most `max_connections` connections.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the server rejects the
/// initial connection.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Apply pending migrations from `migrations/`.
///
/// The initial migration creates the `payment_attempts` table with its
/// unique `transaction_reference`, the webhook tables (delivery logs cascade
/// with their subscription) and the ad, plan and talent listing targets.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
