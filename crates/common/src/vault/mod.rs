//! Vault crypto service
//!
//! A vault is described by three pieces of key material:
//! - the **member key**, shared with every member through an access token,
//! - the **recovery key**, only ever in owners' tokens,
//! - the **seeds**, carried inside the metadata that the member key wraps.
//!
//! The hub stores the wrapped metadata on the vault record and one access
//! token per (vault, user). Nothing here ever leaves the client unwrapped.

mod access_token;
mod dir_id;
mod keys;
mod metadata;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

pub use access_token::{decrypt_access_token, decrypt_owner_access_token, issue_access_token};
pub use dir_id::{
    compute_root_directory_id, compute_root_directory_id_hash, root_directory_path,
    DIR_ID_HASH_SIZE,
};
pub use keys::{create_vault_keys, MemberKey, RecoveryKey, SeedSet, VaultKeys, KDF_SALT_SIZE};
pub use metadata::{
    decrypt_metadata, encrypt_metadata, AutomaticAccessGrantConfig, StaticCredentials,
    StorageDescriptor, VaultMetadata, UVF_SPEC_VERSION,
};

use crate::crypto::UserKeyPair;
use crate::error::{AccessError, Result};
use crate::hub::{AccessTokenBatch, HubApi, HubApiError, VaultDto};

/// Talks to the hub on behalf of the current user about vault key material
#[derive(Clone)]
pub struct VaultCrypto {
    hub: Arc<dyn HubApi>,
}

impl VaultCrypto {
    pub fn new(hub: Arc<dyn HubApi>) -> Self {
        Self { hub }
    }

    /// The current user's access token for a vault
    ///
    /// # Returns
    /// * `Err(AccessError::NotMember)` - the hub holds no token for us
    async fn own_access_token(&self, vault_id: Uuid) -> Result<String> {
        match self.hub.get_access_token(vault_id).await {
            Ok(token) => Ok(token),
            Err(HubApiError::NotFound(_)) | Err(HubApiError::Forbidden(_)) => {
                Err(AccessError::NotMember(vault_id).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Member key (and recovery key, for owners) plus decrypted metadata
    pub async fn unlock(
        &self,
        vault_id: Uuid,
        own_keys: &UserKeyPair,
    ) -> Result<(MemberKey, Option<RecoveryKey>, VaultMetadata)> {
        let token = self.own_access_token(vault_id).await?;
        let (member_key, recovery_key) = decrypt_owner_access_token(&token, own_keys)?;

        let vault = self.hub.get_vault(vault_id).await?;
        let payload = vault
            .uvf_metadata_file
            .ok_or_else(|| AccessError::NotFound(format!("metadata of vault {vault_id}")))?;
        let metadata = decrypt_metadata(&payload, &member_key)?;
        Ok((member_key, recovery_key, metadata))
    }

    pub async fn fetch_and_decrypt_metadata(
        &self,
        vault_id: Uuid,
        own_keys: &UserKeyPair,
    ) -> Result<VaultMetadata> {
        let (_, _, metadata) = self.unlock(vault_id, own_keys).await?;
        Ok(metadata)
    }

    /// Create a vault record on the hub and hand the owner their token
    pub async fn create_vault(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        storage: StorageDescriptor,
        grant: AutomaticAccessGrantConfig,
        own_keys: &UserKeyPair,
    ) -> Result<(VaultDto, VaultKeys)> {
        let me = self.hub.current_user().await?;
        let keys = create_vault_keys();

        let metadata = encrypt_metadata(&storage, &grant, &keys.seeds, &keys.member_key)?;
        let root_dir_id = compute_root_directory_id(&keys.seeds);
        let vault = VaultDto {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            archived: false,
            creation_time: Utc::now(),
            uvf_metadata_file: Some(metadata),
            root_dir_hash: Some(compute_root_directory_id_hash(&root_dir_id, &keys.seeds)),
        };
        self.hub.put_vault(vault.clone()).await?;

        let owner_token = issue_access_token(
            &keys.member_key,
            &own_keys.public_keys().ecdh_public_key,
            Some(&keys.recovery_key),
        )?;
        self.hub
            .grant_access(vault.id, AccessTokenBatch::from([(me.id.clone(), owner_token)]))
            .await?;

        tracing::info!("created vault {} ({}) owned by {}", vault.name, vault.id, me.id);
        Ok((vault, keys))
    }

    /// Re-encrypt the metadata with a new automatic access grant setting
    pub async fn update_automatic_access_grant(
        &self,
        vault_id: Uuid,
        grant: AutomaticAccessGrantConfig,
        own_keys: &UserKeyPair,
    ) -> Result<VaultMetadata> {
        let (member_key, _, mut metadata) = self.unlock(vault_id, own_keys).await?;
        metadata.automatic_access_grant = grant;

        let mut vault = self.hub.get_vault(vault_id).await?;
        vault.uvf_metadata_file = Some(encrypt_metadata(
            &metadata.storage,
            &metadata.automatic_access_grant,
            &metadata.seeds,
            &member_key,
        )?);
        self.hub.put_vault(vault).await?;

        tracing::info!(
            "vault {} automatic access grant: enabled={} max_wot_depth={}",
            vault_id,
            grant.enabled,
            grant.max_wot_depth
        );
        Ok(metadata)
    }
}
