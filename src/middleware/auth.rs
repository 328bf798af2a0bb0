//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from the Authorization header
//! 2. Hash it and verify it against the key store
//! 3. Inject authentication context into the request
//! 4. Reject unauthorized requests with HTTP 401

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::api_key::Role;
use crate::state::AppState;

/// Authentication context attached to authenticated requests.
///
/// Inserted into the request's extension map; route handlers extract it
/// with `Extension<AuthContext>` to know who made the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// ID of the authenticated API key
    pub api_key_id: Uuid,

    /// Platform user the key belongs to. Every owned resource is filtered by it.
    pub user_id: Uuid,

    pub role: Role,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}

/// SHA-256 hex digest under which API keys are stored.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Look up an active key with that hash
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidApiKey)?;

    let key_hash = hash_api_key(api_key);

    let record = state
        .stores
        .api_keys
        .find_active_api_key(&key_hash)
        .await?
        .ok_or(AppError::InvalidApiKey)?;

    let role = record.role.parse::<Role>().map_err(|e| {
        tracing::warn!(api_key_id = %record.id, error = %e, "API key has unknown role");
        AppError::InvalidApiKey
    })?;

    request.extensions_mut().insert(AuthContext {
        api_key_id: record.id,
        user_id: record.user_id,
        role,
    });

    Ok(next.run(request).await)
}
