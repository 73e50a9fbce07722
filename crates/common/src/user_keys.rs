//! User key service
//!
//! Resolves the logged-in user's [`UserKeyPair`] for a hub connection. Which
//! path is taken depends on what the hub has published and on what this
//! installation has stored locally:
//!
//! | user keys on hub | device key local | path                                     |
//! |------------------|------------------|------------------------------------------|
//! | yes              | yes              | unwrap the device-specific copy          |
//! | yes              | no (or unknown)  | recover with the Account Key, add device |
//! | no               | any              | first-time setup, show new Account Key   |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::crypto::{jwe, AccountKey, DeviceKeyPair, KeyEncryptionKey, UserKeyPair, UserPublicKeys};
use crate::device::{device_id, DeviceKeyStore};
use crate::error::{AccessError, Error, Result, SecurityFailure};
use crate::hub::{DeviceDto, HubApi, UserDto, UserKeysDto};
use crate::prompt::Prompt;

#[async_trait]
pub trait UserKeyService: Send + Sync {
    /// The current user's key pair, recovering or creating it if needed
    async fn user_keys(&self) -> Result<UserKeyPair>;
}

/// Resolves user keys against a hub, prompting the user where necessary
pub struct HubUserKeyService {
    hub_id: String,
    hub: Arc<dyn HubApi>,
    prompt: Arc<dyn Prompt>,
    device_keys: DeviceKeyStore,
    config: SessionConfig,
}

impl HubUserKeyService {
    pub fn new(
        hub_id: impl Into<String>,
        hub: Arc<dyn HubApi>,
        prompt: Arc<dyn Prompt>,
        device_keys: DeviceKeyStore,
        config: SessionConfig,
    ) -> Self {
        Self {
            hub_id: hub_id.into(),
            hub,
            prompt,
            device_keys,
            config,
        }
    }

    /// Unwrap the copy of the user keys registered for this device
    async fn from_device(
        &self,
        device: &DeviceKeyPair,
        published: &UserPublicKeys,
    ) -> Result<UserKeyPair> {
        let id = device_id(&device.public());
        let registered = self.hub.get_device(&id).await?;

        let json = jwe::ecdh_unwrap(&registered.user_private_key, device.secret())?;
        let keys = UserKeyPair::from_private_json(&json)?;
        keys.verify_against(published)?;
        Ok(keys)
    }

    /// Recover the user keys with the Account Key and register this device
    async fn recover(
        &self,
        me: &UserDto,
        published: &UserPublicKeys,
        device: Option<DeviceKeyPair>,
    ) -> Result<UserKeyPair> {
        let wrapped = me.private_keys.clone().ok_or_else(|| {
            AccessError::NotFound(format!("wrapped private keys of user {}", me.id))
        })?;

        let max_attempts = self.config.max_account_key_attempts.max(1);
        let mut attempt = 0;
        let (keys, device_name) = loop {
            attempt += 1;
            let (account_key, device_name) =
                self.prompt.ask_for_account_key_and_device_name().await?;

            match unwrap_with_account_key(wrapped.clone(), account_key).await {
                Ok(json) => break (UserKeyPair::from_private_json(&json)?, device_name),
                Err(SecurityFailure::Integrity(_)) if attempt < max_attempts => {
                    tracing::warn!(
                        "wrong account key for user {} (attempt {}/{})",
                        me.id,
                        attempt,
                        max_attempts
                    );
                    self.prompt.invalid_account_key().await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        keys.verify_against(published)?;
        self.register_device(&me.id, &keys, device_name, device)
            .await?;
        Ok(keys)
    }

    /// Generate user keys and an Account Key for a user who has none yet
    async fn setup(&self, me: &UserDto, device: Option<DeviceKeyPair>) -> Result<UserKeyPair> {
        let keys = UserKeyPair::generate();
        let account_key = AccountKey::generate();
        let device_name = self
            .prompt
            .display_account_key_and_ask_device_name(&account_key)
            .await?;

        let private_keys = wrap_with_account_key(&keys, account_key, self.config.kdf).await?;
        let public = keys.public_keys();
        self.hub
            .put_user_keys(UserKeysDto {
                ecdh_public_key: public.ecdh_public_key.to_base64(),
                ecdsa_public_key: public.signing_public_key.to_base64(),
                private_keys,
            })
            .await?;
        tracing::info!("published new user keys for {}", me.id);

        self.register_device(&me.id, &keys, device_name, device)
            .await?;
        Ok(keys)
    }

    /// Upload a device-specific copy of the user keys, then persist the device key
    async fn register_device(
        &self,
        user_id: &str,
        keys: &UserKeyPair,
        name: String,
        device: Option<DeviceKeyPair>,
    ) -> Result<()> {
        let device = device.unwrap_or_else(DeviceKeyPair::generate);
        let public = device.public();
        let id = device_id(&public);

        let dto = DeviceDto {
            id: id.clone(),
            name,
            device_type: self.config.device_type.clone(),
            public_key: public.to_base64(),
            user_private_key: jwe::ecdh_wrap(&keys.to_private_json(), &public)?,
            owner_id: user_id.to_string(),
            creation_time: Utc::now(),
        };
        self.hub.put_device(dto).await?;
        self.device_keys.put(&self.hub_id, user_id, &device)?;

        tracing::info!("registered device {} for user {}", id, user_id);
        Ok(())
    }
}

#[async_trait]
impl UserKeyService for HubUserKeyService {
    async fn user_keys(&self) -> Result<UserKeyPair> {
        let me = self.hub.current_user().await?;
        let published = me.public_keys()?;
        let device = self.device_keys.get(&self.hub_id, &me.id)?;

        match (published, device) {
            (Some(published), Some(device)) => match self.from_device(&device, &published).await {
                Err(Error::Access(AccessError::NotFound(_))) => {
                    tracing::info!(
                        "device {} is not registered for {}, recovering with account key",
                        device_id(&device.public()),
                        me.id
                    );
                    self.recover(&me, &published, Some(device)).await
                }
                result => result,
            },
            (Some(published), None) => {
                tracing::info!("no local device key for {}, recovering with account key", me.id);
                self.recover(&me, &published, None).await
            }
            (None, device) => {
                tracing::info!("user {} has no keys yet, running first-time setup", me.id);
                self.setup(&me, device).await
            }
        }
    }
}

// Argon2id is deliberately slow, keep it off the async workers
async fn wrap_with_account_key(
    keys: &UserKeyPair,
    account_key: AccountKey,
    params: crate::crypto::KdfParams,
) -> Result<String> {
    let json = keys.to_private_json();
    tokio::task::spawn_blocking(move || {
        let kek = KeyEncryptionKey::derive(account_key.as_str(), &params)?;
        jwe::wrap(&json, &kek)
    })
    .await
    .map_err(|e| SecurityFailure::Crypto(format!("key derivation task failed: {e}")))?
    .map_err(Error::from)
}

async fn unwrap_with_account_key(
    wrapped: String,
    account_key: AccountKey,
) -> std::result::Result<zeroize::Zeroizing<Vec<u8>>, SecurityFailure> {
    tokio::task::spawn_blocking(move || jwe::unwrap(&wrapped, account_key.as_str()))
        .await
        .map_err(|e| SecurityFailure::Crypto(format!("key derivation task failed: {e}")))?
}

/// Holds the resolved key pair for the lifetime of a session
///
/// Callers racing on an empty cache are serialized, so the inner service
/// (and any prompt it shows) runs once.
pub struct CachingUserKeyService<S> {
    inner: S,
    cached: Mutex<Option<UserKeyPair>>,
}

impl<S: UserKeyService> CachingUserKeyService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    /// Forget the cached key pair (logout)
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

#[async_trait]
impl<S: UserKeyService> UserKeyService for CachingUserKeyService<S> {
    async fn user_keys(&self) -> Result<UserKeyPair> {
        let mut cached = self.cached.lock().await;
        if let Some(keys) = cached.as_ref() {
            return Ok(keys.clone());
        }
        let keys = self.inner.user_keys().await?;
        *cached = Some(keys.clone());
        Ok(keys)
    }
}
