//! Hub directory API
//!
//! The hub stores everything this crate produces, but only ever sees public
//! keys, signatures and JWEs. The transport (REST client, caching, auth) lives
//! outside this crate; services here only talk to the [`HubApi`] trait.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{EcdhPublicKey, SigningPublicKey, UserPublicKeys};
use crate::error::SecurityFailure;

/// Errors a hub implementation reports back
#[derive(Debug, thiserror::Error)]
pub enum HubApiError {
    /// The requested record does not exist (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),
    /// The caller may not access the record (HTTP 403)
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Device ids: upper-case hex SHA-256 of the device public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdh_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdsa_public_key: Option<String>,
    /// User private keys, JWE-wrapped under the Account Key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_keys: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceDto>,
}

impl UserDto {
    /// The user's published public keys, if both halves are published
    ///
    /// A published key that does not decode is a [`SecurityFailure`].
    pub fn public_keys(&self) -> Result<Option<UserPublicKeys>, SecurityFailure> {
        let (Some(ecdh), Some(ecdsa)) = (&self.ecdh_public_key, &self.ecdsa_public_key) else {
            return Ok(None);
        };
        Ok(Some(UserPublicKeys {
            ecdh_public_key: EcdhPublicKey::from_base64(ecdh)?,
            signing_public_key: SigningPublicKey::from_base64(ecdsa)?,
        }))
    }
}

/// Keys a user publishes on first login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKeysDto {
    pub ecdh_public_key: String,
    pub ecdsa_public_key: String,
    pub private_keys: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub public_key: String,
    /// The owner's private keys, ECDH-ES wrapped for this device
    pub user_private_key: String,
    pub owner_id: String,
    pub creation_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VaultRole {
    Owner,
    Member,
}

impl fmt::Display for VaultRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultRole::Owner => write!(f, "OWNER"),
            VaultRole::Member => write!(f, "MEMBER"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultDto {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub archived: bool,
    pub creation_time: DateTime<Utc>,
    /// Vault metadata (UVF), JWE-wrapped under the member key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uvf_metadata_file: Option<String>,
    /// Hash of the root directory id, recorded for storage provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir_hash: Option<String>,
}

/// A vault as listed for the current user, with their effective role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultMembershipDto {
    pub vault: VaultDto,
    pub role: VaultRole,
}

/// A member who holds a role on a vault but no access token yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDto {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdh_public_key: Option<String>,
}

/// A user the hub claims the current user trusts, with the signatures
///  supporting that claim, first link signed by the current user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedUserDto {
    pub trusted_user_id: String,
    pub signature_chain: Vec<String>,
}

/// Access tokens keyed by recipient user id
pub type AccessTokenBatch = BTreeMap<String, String>;

/// Everything the services in this crate need from a hub
#[async_trait]
pub trait HubApi: Send + Sync {
    /// The logged-in user, with published keys and registered devices
    async fn current_user(&self) -> Result<UserDto, HubApiError>;

    /// Publish the logged-in user's public keys and wrapped private keys
    async fn put_user_keys(&self, keys: UserKeysDto) -> Result<(), HubApiError>;

    async fn get_user(&self, user_id: &str) -> Result<UserDto, HubApiError>;

    /// # Returns
    /// * `Err(HubApiError::NotFound)` - no device registered under this id
    async fn get_device(&self, device_id: &DeviceId) -> Result<DeviceDto, HubApiError>;

    async fn put_device(&self, device: DeviceDto) -> Result<(), HubApiError>;

    /// Vaults the current user holds a role on
    async fn list_vaults(&self) -> Result<Vec<VaultMembershipDto>, HubApiError>;

    async fn get_vault(&self, vault_id: Uuid) -> Result<VaultDto, HubApiError>;

    /// Create or update a vault record. The caller becomes owner on creation.
    async fn put_vault(&self, vault: VaultDto) -> Result<(), HubApiError>;

    /// The current user's access token for a vault
    ///
    /// # Returns
    /// * `Err(HubApiError::NotFound)` / `Err(HubApiError::Forbidden)` - no token yet
    async fn get_access_token(&self, vault_id: Uuid) -> Result<String, HubApiError>;

    /// Upload access tokens for several users in one call
    async fn grant_access(
        &self,
        vault_id: Uuid,
        tokens: AccessTokenBatch,
    ) -> Result<(), HubApiError>;

    async fn members_requiring_access_grant(
        &self,
        vault_id: Uuid,
    ) -> Result<Vec<MemberDto>, HubApiError>;

    async fn list_trusted_users(&self) -> Result<Vec<TrustedUserDto>, HubApiError>;

    async fn get_trusted_user(
        &self,
        user_id: &str,
    ) -> Result<Option<TrustedUserDto>, HubApiError>;

    /// Store the current user's signature about `user_id`
    async fn put_trust_signature(
        &self,
        user_id: &str,
        signature: String,
    ) -> Result<(), HubApiError>;
}
