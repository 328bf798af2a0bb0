//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.
//! Provider sections are optional: a provider is registered only when all of
//! its variables are present.

use std::time::Duration;

use serde::Deserialize;

use crate::gateway::emola::EmolaConfig;
use crate::gateway::mpesa::MpesaConfig;
use crate::gateway::stripe::StripeConfig;
use crate::services::activation::ExpiryPolicy;
use crate::services::webhook_service::NotifierConfig;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): PostgreSQL connection string; an in-memory store is used when absent
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `MPESA_*`, `EMOLA_*`, `STRIPE_*`: provider credentials and endpoints
/// - `VAPID_PRIVATE_KEY_PEM`, `VAPID_SUBJECT`: web push for admin notifications
/// - `DEV_API_KEY`: admin API key seeded into the in-memory store
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub mpesa_api_key: Option<String>,
    pub mpesa_public_key: Option<String>,
    pub mpesa_service_provider_code: Option<String>,
    pub mpesa_c2b_url: Option<String>,
    pub mpesa_b2c_url: Option<String>,
    #[serde(default = "default_mpesa_origin")]
    pub mpesa_origin: String,

    pub emola_url: Option<String>,
    pub emola_username: Option<String>,
    pub emola_password: Option<String>,
    pub emola_partner_code: Option<String>,
    pub emola_key: Option<String>,

    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    #[serde(default = "default_stripe_currency")]
    pub stripe_currency: String,
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    pub vapid_private_key_pem: Option<String>,
    #[serde(default = "default_vapid_subject")]
    pub vapid_subject: String,

    /// Outbound timeout for every provider call
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Per-attempt timeout for outbound webhook deliveries
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    /// Base of the exponential backoff between webhook attempts
    #[serde(default = "default_webhook_backoff_ms")]
    pub webhook_backoff_ms: u64,

    #[serde(default = "default_webhook_max_attempts")]
    pub webhook_max_attempts: u32,

    #[serde(default = "default_retention_days")]
    pub delivery_log_retention_days: i64,

    pub dev_api_key: Option<String>,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_mpesa_origin() -> String {
    "developer.mpesa.vm.co.mz".to_string()
}

fn default_stripe_currency() -> String {
    "mzn".to_string()
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_vapid_subject() -> String {
    "mailto:admin@localhost".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_webhook_backoff_ms() -> u64 {
    1000
}

fn default_webhook_max_attempts() -> u32 {
    3
}

fn default_retention_days() -> i64 {
    90
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variable values cannot be parsed into expected types.
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn mpesa(&self) -> Option<MpesaConfig> {
        Some(MpesaConfig {
            api_key: self.mpesa_api_key.clone()?,
            public_key: self.mpesa_public_key.clone()?,
            service_provider_code: self.mpesa_service_provider_code.clone()?,
            c2b_url: self.mpesa_c2b_url.clone()?,
            b2c_url: self.mpesa_b2c_url.clone()?,
            origin: self.mpesa_origin.clone(),
            timeout: self.provider_timeout(),
        })
    }

    pub fn emola(&self) -> Option<EmolaConfig> {
        Some(EmolaConfig {
            url: self.emola_url.clone()?,
            username: self.emola_username.clone()?,
            password: self.emola_password.clone()?,
            partner_code: self.emola_partner_code.clone()?,
            key: self.emola_key.clone()?,
            timeout: self.provider_timeout(),
        })
    }

    pub fn stripe(&self) -> Option<StripeConfig> {
        Some(StripeConfig {
            api_base: self.stripe_api_base.clone(),
            secret_key: self.stripe_secret_key.clone()?,
            webhook_secret: self.stripe_webhook_secret.clone()?,
            currency: self.stripe_currency.clone(),
            timeout: self.provider_timeout(),
        })
    }

    pub fn notifier(&self) -> NotifierConfig {
        NotifierConfig {
            max_attempts: self.webhook_max_attempts.max(1),
            backoff_base: Duration::from_millis(self.webhook_backoff_ms),
            timeout: Duration::from_secs(self.webhook_timeout_secs),
        }
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::default()
    }

    pub fn delivery_log_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.delivery_log_retention_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> Config {
        envy::from_iter::<_, Config>(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .expect("valid config")
    }

    #[test]
    fn defaults_apply_without_any_variables() {
        let config = load(&[]);
        assert_eq!(config.server_port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.db_max_connections, 5);
        assert!(config.mpesa().is_none());
        assert!(config.stripe().is_none());

        let notifier = config.notifier();
        assert_eq!(notifier.max_attempts, 3);
        assert_eq!(notifier.backoff_after(1), Duration::from_secs(2));
        assert_eq!(notifier.backoff_after(2), Duration::from_secs(4));
        assert_eq!(config.delivery_log_retention(), chrono::Duration::days(90));
    }

    #[test]
    fn provider_needs_every_variable() {
        let partial = load(&[("EMOLA_URL", "https://emola.test"), ("EMOLA_USERNAME", "u")]);
        assert!(partial.emola().is_none());

        let full = load(&[
            ("EMOLA_URL", "https://emola.test"),
            ("EMOLA_USERNAME", "u"),
            ("EMOLA_PASSWORD", "p"),
            ("EMOLA_PARTNER_CODE", "PC"),
            ("EMOLA_KEY", "k"),
        ]);
        let emola = full.emola().expect("configured");
        assert_eq!(emola.partner_code, "PC");
        assert_eq!(emola.timeout, Duration::from_secs(30));
    }
}
