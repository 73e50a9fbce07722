//! Device keys and the local secret store
//!
//! Each (user, hub) installation owns one X25519 key pair. It is generated on
//! first use, kept in a [`SecretStore`] under the account name
//! `"{user_id}@{hub_id}"`, and never uploaded: the hub only learns its public
//! half and the [`DeviceId`] derived from it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::{DeviceKeyPair, EcdhPublicKey, EcdhSecretKey};
use crate::error::{Result, SecurityFailure};
use crate::hub::DeviceId;

pub const DEVICE_PRIVATE_KEY_NAME: &str = "device-private-key";
pub const DEVICE_PUBLIC_KEY_NAME: &str = "device-public-key";
/// Reason shown by OS keychains when the device key is read or written
pub const DEFAULT_SECRET_PROMPT: &str = "Access the device key for your hub account";

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("secret store error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Named secrets scoped by an account name
///
/// Implementations may block (OS keychains, file systems); they must report
/// denied access as an error, never as a missing secret.
pub trait SecretStore: Send + Sync {
    fn get(
        &self,
        account: &str,
        name: &str,
        prompt: &str,
    ) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, SecretStoreError>;

    fn put(
        &self,
        account: &str,
        name: &str,
        value: &[u8],
        prompt: &str,
    ) -> std::result::Result<(), SecretStoreError>;
}

/// Secret store backed by one PEM file per secret: `{root}/{account}/{name}`
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, account: &str, name: &str) -> PathBuf {
        let account: String = account
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || "@._-".contains(c) {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(account).join(name)
    }
}

fn map_io(path: &Path, err: std::io::Error) -> SecretStoreError {
    if err.kind() == ErrorKind::PermissionDenied {
        SecretStoreError::AccessDenied(path.display().to_string())
    } else {
        SecretStoreError::Io(err)
    }
}

impl SecretStore for FileSecretStore {
    fn get(
        &self,
        account: &str,
        name: &str,
        _prompt: &str,
    ) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, SecretStoreError> {
        let path = self.path(account, name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_io(&path, e)),
        }
    }

    fn put(
        &self,
        account: &str,
        name: &str,
        value: &[u8],
        _prompt: &str,
    ) -> std::result::Result<(), SecretStoreError> {
        let path = self.path(account, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io(parent, e))?;
        }
        fs::write(&path, value).map_err(|e| map_io(&path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .map_err(|e| map_io(&path, e))?;
        }
        Ok(())
    }
}

/// Deterministic device id: upper-case hex SHA-256 of the raw public key
pub fn device_id(public_key: &EcdhPublicKey) -> DeviceId {
    DeviceId(hex::encode_upper(Sha256::digest(public_key.to_bytes())))
}

pub fn account_name(hub_id: &str, user_id: &str) -> String {
    format!("{user_id}@{hub_id}")
}

/// Owns this installation's device key pair
#[derive(Clone)]
pub struct DeviceKeyStore {
    store: Arc<dyn SecretStore>,
    prompt: String,
}

impl std::fmt::Debug for DeviceKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyStore")
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

impl DeviceKeyStore {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self::with_prompt(store, DEFAULT_SECRET_PROMPT)
    }

    pub fn with_prompt(store: Arc<dyn SecretStore>, prompt: impl Into<String>) -> Self {
        Self {
            store,
            prompt: prompt.into(),
        }
    }

    /// Load the device key pair for this (hub, user), if one was stored
    ///
    /// A stored public half that does not belong to the private half is
    /// treated as tampering.
    pub fn get(&self, hub_id: &str, user_id: &str) -> Result<Option<DeviceKeyPair>> {
        let account = account_name(hub_id, user_id);
        let Some(private_pem) = self
            .store
            .get(&account, DEVICE_PRIVATE_KEY_NAME, &self.prompt)?
        else {
            return Ok(None);
        };

        let private_pem = std::str::from_utf8(&private_pem)
            .map_err(|_| SecurityFailure::Malformed("device key is not valid PEM".into()))?;
        let secret = EcdhSecretKey::from_pem(private_pem)?;
        let keys = DeviceKeyPair::new(secret);

        if let Some(public) = self
            .store
            .get(&account, DEVICE_PUBLIC_KEY_NAME, &self.prompt)?
        {
            let public = std::str::from_utf8(&public)
                .map_err(|_| SecurityFailure::Malformed("device public key".into()))?;
            if EcdhPublicKey::from_base64(public)? != keys.public() {
                return Err(SecurityFailure::KeyMismatch(
                    "stored device public key does not match private key",
                )
                .into());
            }
        }

        Ok(Some(keys))
    }

    /// Persist both halves of a device key pair
    pub fn put(&self, hub_id: &str, user_id: &str, keys: &DeviceKeyPair) -> Result<()> {
        let account = account_name(hub_id, user_id);
        self.store.put(
            &account,
            DEVICE_PRIVATE_KEY_NAME,
            keys.secret().to_pem().as_bytes(),
            &self.prompt,
        )?;
        self.store.put(
            &account,
            DEVICE_PUBLIC_KEY_NAME,
            keys.public().to_base64().as_bytes(),
            &self.prompt,
        )?;
        Ok(())
    }

    /// Load the device key pair, generating and persisting one if absent
    pub fn get_or_create(&self, hub_id: &str, user_id: &str) -> Result<DeviceKeyPair> {
        if let Some(keys) = self.get(hub_id, user_id)? {
            return Ok(keys);
        }
        let keys = DeviceKeyPair::generate();
        self.put(hub_id, user_id, &keys)?;
        tracing::info!(
            "generated device key {} for {}",
            device_id(&keys.public()),
            account_name(hub_id, user_id)
        );
        Ok(keys)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{AccessError, Error};
    use crate::testkit::MemorySecretStore;

    #[test]
    fn test_device_id_deterministic() {
        let keys = DeviceKeyPair::generate();
        assert_eq!(device_id(&keys.public()), device_id(&keys.public()));
        assert_eq!(device_id(&keys.public()).0.len(), 64);
        assert_ne!(
            device_id(&keys.public()),
            device_id(&DeviceKeyPair::generate().public())
        );
    }

    #[test]
    fn test_get_or_create_persists() {
        let store = DeviceKeyStore::new(Arc::new(MemorySecretStore::new()));
        assert!(store.get("hub", "alice").unwrap().is_none());

        let created = store.get_or_create("hub", "alice").unwrap();
        let loaded = store.get_or_create("hub", "alice").unwrap();
        assert_eq!(created.public(), loaded.public());

        // scoped per hub
        assert!(store.get("other-hub", "alice").unwrap().is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceKeyStore::new(Arc::new(FileSecretStore::new(dir.path())));
        let created = store.get_or_create("hub.example.com", "alice").unwrap();

        let reopened = DeviceKeyStore::new(Arc::new(FileSecretStore::new(dir.path())));
        let loaded = reopened.get("hub.example.com", "alice").unwrap().unwrap();
        assert_eq!(created.public(), loaded.public());
    }

    #[test]
    fn test_mismatched_public_half_rejected() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = DeviceKeyStore::new(secrets.clone());
        store.get_or_create("hub", "alice").unwrap();

        let other = DeviceKeyPair::generate().public().to_base64();
        secrets
            .put(
                &account_name("hub", "alice"),
                DEVICE_PUBLIC_KEY_NAME,
                other.as_bytes(),
                "",
            )
            .unwrap();
        assert!(store.get("hub", "alice").unwrap_err().is_security());
    }

    #[test]
    fn test_denied_access_is_access_error() {
        let secrets = Arc::new(MemorySecretStore::new());
        secrets.deny_access(true);
        let store = DeviceKeyStore::new(secrets);
        let err = store.get_or_create("hub", "alice").unwrap_err();
        assert!(matches!(
            err,
            Error::Access(AccessError::SecretStore(SecretStoreError::AccessDenied(_)))
        ));
    }
}
