use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::crypto::UserPublicKeys;
use crate::hub::{
    AccessTokenBatch, DeviceDto, DeviceId, HubApi, HubApiError, MemberDto, TrustedUserDto,
    UserDto, UserKeysDto, VaultDto, VaultMembershipDto, VaultRole,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub current_user: usize,
    pub get_device: usize,
    pub put_device: usize,
    pub grant_access: usize,
    pub list_trusted_users: usize,
    pub list_vaults: usize,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<String, UserDto>,
    devices: BTreeMap<DeviceId, DeviceDto>,
    vaults: BTreeMap<Uuid, VaultDto>,
    roles: BTreeMap<(Uuid, String), VaultRole>,
    tokens: BTreeMap<(Uuid, String), String>,
    /// (signer, subject) -> signature
    signatures: BTreeMap<(String, String), String>,
    /// Extra entries returned to a viewer on top of the computed chains
    injected: BTreeMap<String, Vec<TrustedUserDto>>,
    /// Number of upcoming `list_vaults` calls that fail
    failing_list_vaults: usize,
    calls: CallCounts,
}

impl State {
    fn user(&self, id: &str) -> Result<UserDto, HubApiError> {
        let mut user = self
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| HubApiError::NotFound(format!("user {id}")))?;
        user.devices = self
            .devices
            .values()
            .filter(|d| d.owner_id == id)
            .cloned()
            .collect();
        Ok(user)
    }

    fn role(&self, vault_id: Uuid, user_id: &str) -> Option<VaultRole> {
        self.roles.get(&(vault_id, user_id.to_string())).copied()
    }

    fn require_owner(&self, vault_id: Uuid, user_id: &str) -> Result<(), HubApiError> {
        if !self.vaults.contains_key(&vault_id) {
            return Err(HubApiError::NotFound(format!("vault {vault_id}")));
        }
        match self.role(vault_id, user_id) {
            Some(VaultRole::Owner) => Ok(()),
            _ => Err(HubApiError::Forbidden(format!(
                "{user_id} does not own vault {vault_id}"
            ))),
        }
    }

    /// Shortest signature chain from `viewer` to everyone they reach
    fn trust_chains(&self, viewer: &str) -> Vec<TrustedUserDto> {
        let mut chains = Vec::new();
        let mut seen = BTreeSet::from([viewer.to_string()]);
        let mut queue = VecDeque::from([(viewer.to_string(), Vec::<String>::new())]);

        while let Some((signer, chain)) = queue.pop_front() {
            for ((s, subject), signature) in &self.signatures {
                if *s != signer || seen.contains(subject) {
                    continue;
                }
                seen.insert(subject.clone());
                let mut next = chain.clone();
                next.push(signature.clone());
                chains.push(TrustedUserDto {
                    trusted_user_id: subject.clone(),
                    signature_chain: next.clone(),
                });
                queue.push_back((subject.clone(), next));
            }
        }

        if let Some(extra) = self.injected.get(viewer) {
            chains.extend(extra.iter().cloned());
        }
        chains
    }
}

/// A hub kept in memory, shared by every handle cloned from it
///
/// Each handle acts as one logged-in user. Every call yields to the runtime
/// once, so concurrent callers interleave the way they would over a network.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<State>>,
    current: String,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the same hub, logged in as `user_id`
    pub fn as_user(&self, user_id: &str) -> Self {
        Self {
            state: self.state.clone(),
            current: user_id.to_string(),
        }
    }

    pub fn current_user_id(&self) -> &str {
        &self.current
    }

    pub fn add_user(&self, id: &str, name: &str) {
        self.state.lock().users.insert(
            id.to_string(),
            UserDto {
                id: id.to_string(),
                name: name.to_string(),
                ecdh_public_key: None,
                ecdsa_public_key: None,
                private_keys: None,
                devices: Vec::new(),
            },
        );
    }

    /// Publish public keys for a user, as if they had completed setup elsewhere
    pub fn publish_public_keys(&self, user_id: &str, keys: &UserPublicKeys) {
        if let Some(user) = self.state.lock().users.get_mut(user_id) {
            user.ecdh_public_key = Some(keys.ecdh_public_key.to_base64());
            user.ecdsa_public_key = Some(keys.signing_public_key.to_base64());
        }
    }

    pub fn user(&self, user_id: &str) -> Option<UserDto> {
        self.state.lock().user(user_id).ok()
    }

    /// Give `user_id` a member role on a vault, without a token
    pub fn add_member(&self, vault_id: Uuid, user_id: &str) {
        self.state
            .lock()
            .roles
            .insert((vault_id, user_id.to_string()), VaultRole::Member);
    }

    pub fn set_archived(&self, vault_id: Uuid, archived: bool) {
        if let Some(vault) = self.state.lock().vaults.get_mut(&vault_id) {
            vault.archived = archived;
        }
    }

    /// Return `entry` from `viewer`'s trusted user listing, whatever it contains
    pub fn inject_trusted_user(&self, viewer: &str, entry: TrustedUserDto) {
        self.state
            .lock()
            .injected
            .entry(viewer.to_string())
            .or_default()
            .push(entry);
    }

    /// Unregister every device of a user
    pub fn remove_devices(&self, user_id: &str) {
        self.state
            .lock()
            .devices
            .retain(|_, device| device.owner_id != user_id);
    }

    pub fn access_token(&self, vault_id: Uuid, user_id: &str) -> Option<String> {
        self.state
            .lock()
            .tokens
            .get(&(vault_id, user_id.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// Make the next `times` vault listings fail as if the hub were down
    pub fn fail_list_vaults(&self, times: usize) {
        self.state.lock().failing_list_vaults = times;
    }
}

#[async_trait]
impl HubApi for MemoryHub {
    async fn current_user(&self) -> Result<UserDto, HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.current_user += 1;
        state.user(&self.current)
    }

    async fn put_user_keys(&self, keys: UserKeysDto) -> Result<(), HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        let user = state
            .users
            .get_mut(&self.current)
            .ok_or_else(|| HubApiError::NotFound(format!("user {}", self.current)))?;
        user.ecdh_public_key = Some(keys.ecdh_public_key);
        user.ecdsa_public_key = Some(keys.ecdsa_public_key);
        user.private_keys = Some(keys.private_keys);
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<UserDto, HubApiError> {
        tokio::task::yield_now().await;
        self.state.lock().user(user_id)
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<DeviceDto, HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.get_device += 1;
        state
            .devices
            .get(device_id)
            .filter(|d| d.owner_id == self.current)
            .cloned()
            .ok_or_else(|| HubApiError::NotFound(format!("device {device_id}")))
    }

    async fn put_device(&self, device: DeviceDto) -> Result<(), HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.put_device += 1;
        if device.owner_id != self.current {
            return Err(HubApiError::Forbidden(format!("device {}", device.id)));
        }
        state.devices.insert(device.id.clone(), device);
        Ok(())
    }

    async fn list_vaults(&self) -> Result<Vec<VaultMembershipDto>, HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.list_vaults += 1;
        if state.failing_list_vaults > 0 {
            state.failing_list_vaults -= 1;
            return Err(HubApiError::Other(anyhow::anyhow!("hub unavailable")));
        }
        Ok(state
            .roles
            .iter()
            .filter(|((_, user), _)| *user == self.current)
            .filter_map(|((vault_id, _), role)| {
                state.vaults.get(vault_id).map(|vault| VaultMembershipDto {
                    vault: vault.clone(),
                    role: *role,
                })
            })
            .collect())
    }

    async fn get_vault(&self, vault_id: Uuid) -> Result<VaultDto, HubApiError> {
        tokio::task::yield_now().await;
        let state = self.state.lock();
        let vault = state
            .vaults
            .get(&vault_id)
            .cloned()
            .ok_or_else(|| HubApiError::NotFound(format!("vault {vault_id}")))?;
        match state.role(vault_id, &self.current) {
            Some(_) => Ok(vault),
            None => Err(HubApiError::Forbidden(format!("vault {vault_id}"))),
        }
    }

    async fn put_vault(&self, vault: VaultDto) -> Result<(), HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        if state.vaults.contains_key(&vault.id) {
            state.require_owner(vault.id, &self.current)?;
        } else {
            state
                .roles
                .insert((vault.id, self.current.clone()), VaultRole::Owner);
        }
        state.vaults.insert(vault.id, vault);
        Ok(())
    }

    async fn get_access_token(&self, vault_id: Uuid) -> Result<String, HubApiError> {
        tokio::task::yield_now().await;
        let state = self.state.lock();
        if state.role(vault_id, &self.current).is_none() {
            return Err(HubApiError::Forbidden(format!("vault {vault_id}")));
        }
        state
            .tokens
            .get(&(vault_id, self.current.clone()))
            .cloned()
            .ok_or_else(|| HubApiError::NotFound(format!("access token for vault {vault_id}")))
    }

    async fn grant_access(
        &self,
        vault_id: Uuid,
        tokens: AccessTokenBatch,
    ) -> Result<(), HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.grant_access += 1;
        state.require_owner(vault_id, &self.current)?;
        for (user_id, token) in tokens {
            state.tokens.insert((vault_id, user_id), token);
        }
        Ok(())
    }

    async fn members_requiring_access_grant(
        &self,
        vault_id: Uuid,
    ) -> Result<Vec<MemberDto>, HubApiError> {
        tokio::task::yield_now().await;
        let state = self.state.lock();
        state.require_owner(vault_id, &self.current)?;
        Ok(state
            .roles
            .keys()
            .filter(|(id, user)| {
                *id == vault_id && !state.tokens.contains_key(&(*id, user.clone()))
            })
            .filter_map(|(_, user)| state.users.get(user))
            .map(|user| MemberDto {
                id: user.id.clone(),
                name: user.name.clone(),
                ecdh_public_key: user.ecdh_public_key.clone(),
            })
            .collect())
    }

    async fn list_trusted_users(&self) -> Result<Vec<TrustedUserDto>, HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.list_trusted_users += 1;
        Ok(state.trust_chains(&self.current))
    }

    async fn get_trusted_user(
        &self,
        user_id: &str,
    ) -> Result<Option<TrustedUserDto>, HubApiError> {
        tokio::task::yield_now().await;
        Ok(self
            .state
            .lock()
            .trust_chains(&self.current)
            .into_iter()
            .find(|entry| entry.trusted_user_id == user_id))
    }

    async fn put_trust_signature(
        &self,
        user_id: &str,
        signature: String,
    ) -> Result<(), HubApiError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        if !state.users.contains_key(user_id) {
            return Err(HubApiError::NotFound(format!("user {user_id}")));
        }
        state
            .signatures
            .insert((self.current.clone(), user_id.to_string()), signature);
        Ok(())
    }
}
