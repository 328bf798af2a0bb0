use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::ProviderClient;
use super::emola::{EmolaClient, EmolaConfig};
use super::error::{GatewayError, GatewayResult};
use super::mpesa::{MpesaClient, MpesaConfig};
use super::types::{Direction, ProviderName, ProviderOutcome, ProviderRequest};

/// Routes a payment to the client registered for `(provider, direction)`.
///
/// The registry is filled once at startup and only read afterwards. There is
/// no fallback between providers and no retry: the selected client's result
/// is returned as is.
#[derive(Clone, Default)]
pub struct GatewayDispatcher {
    clients: HashMap<(ProviderName, Direction), Arc<dyn ProviderClient>>,
}

impl GatewayDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all clients for the configured providers. Providers without
    /// configuration are left out and report `NotConfigured` when selected.
    pub fn from_config(
        mpesa: Option<&MpesaConfig>,
        emola: Option<&EmolaConfig>,
    ) -> GatewayResult<Self> {
        let mut dispatcher = Self::new();
        if let Some(config) = mpesa {
            let (c2b, b2c) = MpesaClient::pair(config)?;
            dispatcher.register(Arc::new(c2b));
            dispatcher.register(Arc::new(b2c));
        }
        if let Some(config) = emola {
            let (c2b, b2c) = EmolaClient::pair(config)?;
            dispatcher.register(Arc::new(c2b));
            dispatcher.register(Arc::new(b2c));
        }
        Ok(dispatcher)
    }

    /// Register a client under its own `(provider, direction)`, replacing any
    /// previous registration for that pair.
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        let key = (client.provider(), client.direction());
        info!(provider = %key.0, direction = %key.1, "registered payment provider");
        self.clients.insert(key, client);
    }

    pub fn select(
        &self,
        provider: ProviderName,
        direction: Direction,
    ) -> GatewayResult<Arc<dyn ProviderClient>> {
        self.clients
            .get(&(provider, direction))
            .cloned()
            .ok_or(GatewayError::NotConfigured {
                provider,
                direction,
            })
    }

    pub async fn pay(
        &self,
        provider: ProviderName,
        phone: Option<String>,
        amount_cents: i64,
        direction: Direction,
        reference: Option<String>,
    ) -> GatewayResult<ProviderOutcome> {
        let client = self.select(provider, direction)?;
        client
            .payment(ProviderRequest {
                phone,
                amount_cents,
                reference,
            })
            .await
    }

    /// Registered pairs in a stable order.
    pub fn registered(&self) -> Vec<(ProviderName, Direction)> {
        let mut pairs: Vec<_> = self.clients.keys().copied().collect();
        pairs.sort();
        pairs
    }
}
