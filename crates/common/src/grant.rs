//! Automatic access grant
//!
//! For every vault the current user owns, members still waiting for an
//! access token get one if the vault opted in and the member is close enough
//! in the web of trust. Runs unattended; every decision is re-derived from
//! what the hub reports and what verifies locally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::crypto::{EcdhPublicKey, UserKeyPair};
use crate::error::{Error, Result};
use crate::hub::{AccessTokenBatch, HubApi, MemberDto, VaultDto, VaultRole};
use crate::user_keys::UserKeyService;
use crate::vault::{issue_access_token, VaultCrypto};
use crate::wot::{Depth, TrustLevels, WotService};

/// What to do about one member waiting for access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberDecision {
    Grant(EcdhPublicKey),
    /// The member never logged in, so there is nothing to wrap the key for
    NoPublicKey,
    InvalidPublicKey,
    Untrusted,
    TooDistant { depth: Depth, max: Depth },
}

/// Decide whether `member` gets a token, given the vault's depth limit
pub fn decide(member: &MemberDto, levels: &TrustLevels, max: Depth) -> MemberDecision {
    let Some(encoded) = member.ecdh_public_key.as_deref() else {
        return MemberDecision::NoPublicKey;
    };
    let Ok(public_key) = EcdhPublicKey::from_base64(encoded) else {
        return MemberDecision::InvalidPublicKey;
    };
    match levels.get(&member.id) {
        None => MemberDecision::Untrusted,
        Some(&depth) if depth > max => MemberDecision::TooDistant { depth, max },
        Some(_) => MemberDecision::Grant(public_key),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultSkip {
    /// Nobody is waiting for a token
    NoPendingMembers,
    /// Automatic granting is switched off or has no depth limit configured
    Disabled,
}

/// Outcome of one run over all owned vaults
#[derive(Debug, Default)]
pub struct GrantReport {
    pub vaults_checked: usize,
    pub granted: Vec<(Uuid, String)>,
    pub skipped_members: Vec<(Uuid, String, MemberDecision)>,
    pub skipped_vaults: Vec<(Uuid, VaultSkip)>,
    pub failures: Vec<(Uuid, Error)>,
}

impl GrantReport {
    pub fn granted_to(&self, vault_id: Uuid) -> Vec<&str> {
        self.granted
            .iter()
            .filter(|(id, _)| *id == vault_id)
            .map(|(_, user)| user.as_str())
            .collect()
    }
}

pub struct AutomaticAccessGrant {
    hub: Arc<dyn HubApi>,
    user_keys: Arc<dyn UserKeyService>,
    wot: Arc<dyn WotService>,
    vaults: VaultCrypto,
    running: Mutex<()>,
    rerun: AtomicBool,
}

impl AutomaticAccessGrant {
    pub fn new(
        hub: Arc<dyn HubApi>,
        user_keys: Arc<dyn UserKeyService>,
        wot: Arc<dyn WotService>,
    ) -> Self {
        Self {
            vaults: VaultCrypto::new(hub.clone()),
            hub,
            user_keys,
            wot,
            running: Mutex::new(()),
            rerun: AtomicBool::new(false),
        }
    }

    /// Grant access where warranted
    ///
    /// Runs do not overlap. A call made while another run is in progress
    /// returns `Ok(None)` at once and makes the running one go around again,
    /// so nothing requested during a run is missed.
    ///
    /// A failed run does not swallow triggers queued during it: the loop
    /// goes around again and only the outcome of the last run is returned.
    pub async fn run(&self) -> Result<Option<GrantReport>> {
        self.rerun.store(true, Ordering::SeqCst);
        let mut outcome = Ok(None);
        loop {
            let Ok(guard) = self.running.try_lock() else {
                tracing::debug!("automatic access grant already running, queued a rerun");
                return outcome;
            };
            while self.rerun.swap(false, Ordering::SeqCst) {
                outcome = self.run_once().await.map(Some);
                if let Err(e) = &outcome {
                    tracing::warn!("automatic access grant run failed: {}", e);
                }
            }
            drop(guard);
            // a trigger may have slipped in between the last check and the unlock
            if !self.rerun.load(Ordering::SeqCst) {
                return outcome;
            }
        }
    }

    async fn run_once(&self) -> Result<GrantReport> {
        let own = self.user_keys.user_keys().await?;
        let memberships = self.hub.list_vaults().await?;
        let mut levels: Option<TrustLevels> = None;
        let mut report = GrantReport::default();

        for membership in memberships {
            let vault = membership.vault;
            if membership.role != VaultRole::Owner || vault.archived {
                continue;
            }
            report.vaults_checked += 1;

            if let Err(e) = self.grant_vault(&vault, &own, &mut levels, &mut report).await {
                tracing::warn!("automatic access grant for vault {} failed: {}", vault.id, e);
                report.failures.push((vault.id, e));
            }
        }

        tracing::info!(
            "automatic access grant checked {} vaults, granted {} tokens",
            report.vaults_checked,
            report.granted.len()
        );
        Ok(report)
    }

    async fn grant_vault(
        &self,
        vault: &VaultDto,
        own: &UserKeyPair,
        levels: &mut Option<TrustLevels>,
        report: &mut GrantReport,
    ) -> Result<()> {
        let members = self.hub.members_requiring_access_grant(vault.id).await?;
        if members.is_empty() {
            report
                .skipped_vaults
                .push((vault.id, VaultSkip::NoPendingMembers));
            return Ok(());
        }

        let (member_key, _, metadata) = self.vaults.unlock(vault.id, own).await?;
        let Some(max) = metadata.automatic_access_grant.max_depth() else {
            tracing::debug!("automatic access grant disabled for vault {}", vault.id);
            report.skipped_vaults.push((vault.id, VaultSkip::Disabled));
            return Ok(());
        };

        if levels.is_none() {
            *levels = Some(self.wot.trust_levels().await?);
        }
        let levels = levels.get_or_insert_with(TrustLevels::new);

        let mut batch = AccessTokenBatch::new();
        for member in members {
            match decide(&member, levels, max) {
                MemberDecision::Grant(public_key) => {
                    let token = issue_access_token(&member_key, &public_key, None)?;
                    batch.insert(member.id, token);
                }
                decision => {
                    tracing::debug!(
                        "not granting {} access to vault {}: {:?}",
                        member.id,
                        vault.id,
                        decision
                    );
                    report.skipped_members.push((vault.id, member.id, decision));
                }
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        let granted: Vec<String> = batch.keys().cloned().collect();
        self.hub.grant_access(vault.id, batch).await?;
        tracing::info!(
            "granted access to vault {} for {}",
            vault.id,
            granted.join(", ")
        );
        report
            .granted
            .extend(granted.into_iter().map(|user| (vault.id, user)));
        Ok(())
    }
}
