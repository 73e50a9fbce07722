use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::device::{SecretStore, SecretStoreError};

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<(String, String), Vec<u8>>>,
    deny: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every access fail as if the user refused the keychain prompt
    pub fn deny_access(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Forget everything, as on a reinstalled device
    pub fn clear(&self) {
        self.secrets.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, account: &str) -> Result<(), SecretStoreError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SecretStoreError::AccessDenied(account.to_string()));
        }
        Ok(())
    }
}

impl SecretStore for MemorySecretStore {
    fn get(
        &self,
        account: &str,
        name: &str,
        _prompt: &str,
    ) -> Result<Option<Zeroizing<Vec<u8>>>, SecretStoreError> {
        self.check(account)?;
        Ok(self
            .secrets
            .lock()
            .get(&(account.to_string(), name.to_string()))
            .map(|v| Zeroizing::new(v.clone())))
    }

    fn put(
        &self,
        account: &str,
        name: &str,
        value: &[u8],
        _prompt: &str,
    ) -> Result<(), SecretStoreError> {
        self.check(account)?;
        self.secrets
            .lock()
            .insert((account.to_string(), name.to_string()), value.to_vec());
        Ok(())
    }
}
