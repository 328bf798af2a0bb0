//! Provider authentication strategies.
//!
//! Each provider client composes one [`ProviderAuthenticator`] with its own
//! transport, so credential mechanics live here and nowhere else.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::RequestBuilder;
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use super::error::{GatewayError, GatewayResult};

/// Partner credentials carried inside a SOAP request body.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvelopeCredentials {
    pub username: String,
    pub password: String,
    pub partner_code: String,
    pub key: String,
}

impl std::fmt::Debug for EnvelopeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCredentials")
            .field("username", &self.username)
            .field("partner_code", &self.partner_code)
            .finish_non_exhaustive()
    }
}

/// Authentication material for one outbound provider call.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Basic { username: String, password: String },
    Envelope(EnvelopeCredentials),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(..)"),
            Credential::Basic { username, .. } => write!(f, "Basic({username})"),
            Credential::Envelope(creds) => write!(f, "Envelope({creds:?})"),
        }
    }
}

impl Credential {
    /// Attach header-borne credentials. Envelope credentials travel in the body.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credential::Bearer(token) => request.bearer_auth(token),
            Credential::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credential::Envelope(_) => request,
        }
    }
}

pub trait ProviderAuthenticator: Send + Sync {
    fn build_credential(&self) -> GatewayResult<Credential>;
}

/// Bearer token made by RSA-encrypting a static API key with the provider's
/// public key (PKCS#1 v1.5, base64 encoded).
pub struct RsaBearerAuthenticator {
    api_key: String,
    public_key: RsaPublicKey,
}

impl RsaBearerAuthenticator {
    /// `public_key` is either a PEM document or the bare base64 DER
    /// (SubjectPublicKeyInfo) string published in provider portals.
    pub fn new(api_key: impl Into<String>, public_key: &str) -> GatewayResult<Self> {
        let public_key = parse_public_key(public_key)?;
        Ok(Self {
            api_key: api_key.into(),
            public_key,
        })
    }
}

fn parse_public_key(raw: &str) -> GatewayResult<RsaPublicKey> {
    let raw = raw.trim();
    if raw.starts_with("-----BEGIN") {
        return RsaPublicKey::from_public_key_pem(raw)
            .map_err(|e| GatewayError::credential("mpesa", format!("invalid PEM public key: {e}")));
    }

    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|e| GatewayError::credential("mpesa", format!("public key is not base64: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| GatewayError::credential("mpesa", format!("invalid DER public key: {e}")))
}

impl ProviderAuthenticator for RsaBearerAuthenticator {
    fn build_credential(&self) -> GatewayResult<Credential> {
        let encrypted = self
            .public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, self.api_key.as_bytes())
            .map_err(|e| GatewayError::credential("mpesa", format!("token encryption failed: {e}")))?;
        Ok(Credential::Bearer(STANDARD.encode(encrypted)))
    }
}

/// HTTP Basic credentials.
pub struct BasicAuthenticator {
    username: String,
    password: String,
}

impl BasicAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl ProviderAuthenticator for BasicAuthenticator {
    fn build_credential(&self) -> GatewayResult<Credential> {
        Ok(Credential::Basic {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

/// Partner credentials embedded in a SOAP envelope.
pub struct EnvelopeAuthenticator {
    credentials: EnvelopeCredentials,
}

impl EnvelopeAuthenticator {
    pub fn new(credentials: EnvelopeCredentials) -> Self {
        Self { credentials }
    }
}

impl ProviderAuthenticator for EnvelopeAuthenticator {
    fn build_credential(&self) -> GatewayResult<Credential> {
        if self.credentials.partner_code.is_empty() {
            return Err(GatewayError::credential("emola", "partner code is empty"));
        }
        Ok(Credential::Envelope(self.credentials.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;

    #[test]
    fn bearer_token_decrypts_to_api_key() {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).expect("generate key");
        let der = private_key
            .to_public_key()
            .to_public_key_der()
            .expect("encode public key");
        let encoded = STANDARD.encode(der.as_bytes());

        let authenticator = RsaBearerAuthenticator::new("api-key-123", &encoded).expect("parse key");
        let Credential::Bearer(token) = authenticator.build_credential().expect("token") else {
            panic!("expected bearer credential");
        };

        let ciphertext = STANDARD.decode(token).expect("base64 token");
        let plaintext = private_key
            .decrypt(Pkcs1v15Encrypt, &ciphertext)
            .expect("decrypt token");
        assert_eq!(plaintext, b"api-key-123");
    }

    #[test]
    fn garbage_public_key_is_a_credential_error() {
        let err = RsaBearerAuthenticator::new("k", "not a key")
            .err()
            .expect("must fail");
        assert!(matches!(err, GatewayError::Credential { .. }));
    }

    #[test]
    fn envelope_requires_partner_code() {
        let authenticator = EnvelopeAuthenticator::new(EnvelopeCredentials {
            username: "u".into(),
            password: "p".into(),
            partner_code: String::new(),
            key: "k".into(),
        });
        assert!(authenticator.build_credential().is_err());
    }
}
