//! Payment provider integrations.
//!
//! Every mobile-money provider exposes one [`ProviderClient`] per money-flow
//! direction; [`GatewayDispatcher`] picks the right one. Card payments go
//! through [`stripe::StripeClient`], which has its own intent-based flow.

mod auth;
mod dispatcher;
pub mod emola;
mod error;
pub mod mpesa;
pub mod phone;
pub mod reference;
pub mod stripe;
mod types;
mod xml;

use async_trait::async_trait;

pub use auth::{
    BasicAuthenticator, Credential, EnvelopeAuthenticator, EnvelopeCredentials,
    ProviderAuthenticator, RsaBearerAuthenticator,
};
pub use dispatcher::GatewayDispatcher;
pub use error::{GatewayError, GatewayResult};
pub use types::{
    CallbackStatus, Direction, ProviderCallback, ProviderName, ProviderOutcome, ProviderRequest,
    ProviderStatus, format_amount,
};

#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> ProviderName;

    fn direction(&self) -> Direction;

    /// Issue a single provider call. Validation problems are returned as
    /// errors before anything is sent; transport failures come back as an
    /// outcome with [`ProviderStatus::Error`].
    async fn payment(&self, request: ProviderRequest) -> GatewayResult<ProviderOutcome>;
}
