//! API Key model for authentication.
//!
//! API keys identify a platform user and their role. They are stored in the database as SHA-256 hashes.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `key_hash`: SHA-256 hash of the actual API key
/// - `user_id`: Platform user the key belongs to
/// - `role`: `user` or `admin`
/// - `created_at`: When the key was created
/// - `is_active`: Whether the key is currently valid
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,

    /// SHA-256 hash of the actual API key (64 hex characters)
    pub key_hash: String,

    pub user_id: Uuid,

    pub role: String,

    pub created_at: DateTime<Utc>,

    /// Inactive keys are rejected during authentication.
    pub is_active: bool,
}

/// Role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}
