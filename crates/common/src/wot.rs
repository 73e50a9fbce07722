//! Web of trust
//!
//! A [`TrustSignature`] is a compact EdDSA JWS in which a signer vouches for
//! the public keys of a subject (`iss` = signer id, `sub` = subject id,
//! payload = the subject's [`UserPublicKeys`]). The hub hands out chains of
//! such signatures starting at the current user; every link is re-verified
//! locally, so the hub cannot forge trust, only withhold it.
//!
//! The depth of a chain is the number of signatures in it. Trust levels count
//! from zero instead: a user I signed directly is at level 0, someone they
//! signed is at level 1, and so on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::crypto::jws::{self, JwsHeader, UnverifiedJws};
use crate::crypto::{SigningPublicKey, SigningSecretKey, UserPublicKeys};
use crate::error::{AccessError, Result, SecurityFailure};
use crate::hub::{HubApi, HubApiError, TrustedUserDto};
use crate::user_keys::UserKeyService;

/// Length of a trust chain, or a trust level derived from one
pub type Depth = u32;

/// Verified trust level per user id, 0 meaning signed by me directly
pub type TrustLevels = HashMap<String, Depth>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustSignature(pub String);

impl TrustSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Vouch for `subject_id` owning `subject`
pub fn sign(
    own_signing_key: &SigningSecretKey,
    own_user_id: &str,
    subject_id: &str,
    subject: &UserPublicKeys,
) -> std::result::Result<TrustSignature, SecurityFailure> {
    let payload = serde_json::to_vec(subject)
        .map_err(|e| SecurityFailure::Crypto(format!("encode trusted keys: {e}")))?;
    let header = JwsHeader::new(own_user_id, subject_id, Utc::now().timestamp());
    jws::sign(&header, &payload, own_signing_key).map(TrustSignature)
}

/// Verify a signature chain and return its depth (number of signatures)
///
/// Link 0 must verify under `root`. Every further link must verify under the
/// keys vouched for by the previous link and be issued by that link's
/// subject. The last link must vouch for exactly `leaf_id` / `leaf_keys`.
/// An empty chain only proves the root itself (depth 0).
pub fn verify_chain(
    chain: &[String],
    root: &SigningPublicKey,
    leaf_id: &str,
    leaf_keys: &UserPublicKeys,
) -> std::result::Result<Depth, SecurityFailure> {
    let mut verify_key = *root;
    let mut last: Option<(String, UserPublicKeys)> = None;

    for (i, token) in chain.iter().enumerate() {
        let (header, payload) = UnverifiedJws::parse(token)?
            .verify(&verify_key)
            .map_err(|e| match e {
                SecurityFailure::InvalidSignature(_) => SecurityFailure::InvalidSignature(i),
                other => other,
            })?;

        let subject = header
            .sub
            .ok_or(SecurityFailure::BrokenChain(i, "signature names no subject"))?;
        if let Some((previous_subject, _)) = &last {
            if header.iss.as_deref() != Some(previous_subject.as_str()) {
                return Err(SecurityFailure::BrokenChain(
                    i,
                    "issuer is not the previous subject",
                ));
            }
        }

        let vouched: UserPublicKeys = serde_json::from_slice(&payload)
            .map_err(|e| SecurityFailure::Malformed(format!("trust signature payload: {e}")))?;
        verify_key = vouched.signing_public_key;
        last = Some((subject, vouched));
    }

    match last {
        None if leaf_keys.signing_public_key == *root => Ok(0),
        None => Err(SecurityFailure::BrokenChain(0, "empty chain for another user")),
        Some((subject, vouched)) if subject == leaf_id && vouched == *leaf_keys => {
            Ok(chain.len() as Depth)
        }
        Some(_) => Err(SecurityFailure::BrokenChain(
            chain.len() - 1,
            "chain does not end at the alleged user",
        )),
    }
}

/// Trust level of a verified chain of `depth` signatures
pub fn trust_level(depth: Depth) -> Depth {
    depth.saturating_sub(1)
}

/// Verify every chain the hub claims for the current user
///
/// Chains that fail verification are dropped with a warning. When several
/// chains reach the same user, the shortest valid one wins.
pub async fn trust_levels_per_user(
    hub: &dyn HubApi,
    own_keys: &UserPublicKeys,
) -> Result<TrustLevels> {
    let trusted = hub.list_trusted_users().await?;
    let root = own_keys.signing_public_key;

    let leaves = join_all(
        trusted
            .iter()
            .map(|entry| published_keys(hub, &entry.trusted_user_id)),
    )
    .await;

    let mut levels = TrustLevels::new();
    for (entry, leaf) in trusted.iter().zip(leaves) {
        let Some(leaf_keys) = leaf? else {
            tracing::debug!(
                "user {} has no published keys, ignoring trust chain",
                entry.trusted_user_id
            );
            continue;
        };
        match verify_chain(&entry.signature_chain, &root, &entry.trusted_user_id, &leaf_keys) {
            Ok(depth) => {
                let level = trust_level(depth);
                levels
                    .entry(entry.trusted_user_id.clone())
                    .and_modify(|l| *l = (*l).min(level))
                    .or_insert(level);
            }
            Err(e) => {
                tracing::warn!(
                    "dropping unverifiable trust chain for {}: {}",
                    entry.trusted_user_id,
                    e
                );
            }
        }
    }
    Ok(levels)
}

/// Published keys of a user; `None` if the user is unknown or keyless
///
/// Keys that do not decode are reported as missing, with a warning.
async fn published_keys(hub: &dyn HubApi, user_id: &str) -> Result<Option<UserPublicKeys>> {
    let user = match hub.get_user(user_id).await {
        Ok(user) => user,
        Err(HubApiError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match user.public_keys() {
        Ok(keys) => Ok(keys),
        Err(e) => {
            tracing::warn!("user {} published undecodable keys: {}", user_id, e);
            Ok(None)
        }
    }
}

#[async_trait]
pub trait WotService: Send + Sync {
    /// Verified trust level of every user reachable from the current user
    async fn trust_levels(&self) -> Result<TrustLevels>;

    /// Trust level of one user, `None` if the hub knows no chain to them
    async fn verify_user(&self, user_id: &str) -> Result<Option<Depth>>;

    /// Sign another user's published keys and upload the signature
    async fn sign_user(&self, user_id: &str) -> Result<TrustSignature>;
}

pub struct HubWotService {
    hub: Arc<dyn HubApi>,
    user_keys: Arc<dyn UserKeyService>,
}

impl HubWotService {
    pub fn new(hub: Arc<dyn HubApi>, user_keys: Arc<dyn UserKeyService>) -> Self {
        Self { hub, user_keys }
    }
}

#[async_trait]
impl WotService for HubWotService {
    async fn trust_levels(&self) -> Result<TrustLevels> {
        let own = self.user_keys.user_keys().await?;
        trust_levels_per_user(self.hub.as_ref(), &own.public_keys()).await
    }

    async fn verify_user(&self, user_id: &str) -> Result<Option<Depth>> {
        let own = self.user_keys.user_keys().await?;
        let Some(TrustedUserDto {
            trusted_user_id,
            signature_chain,
        }) = self.hub.get_trusted_user(user_id).await?
        else {
            return Ok(None);
        };
        let Some(leaf_keys) = published_keys(self.hub.as_ref(), &trusted_user_id).await? else {
            return Ok(None);
        };
        let depth = verify_chain(
            &signature_chain,
            &own.public_keys().signing_public_key,
            user_id,
            &leaf_keys,
        )?;
        Ok(Some(trust_level(depth)))
    }

    async fn sign_user(&self, user_id: &str) -> Result<TrustSignature> {
        let own = self.user_keys.user_keys().await?;
        let me = self.hub.current_user().await?;
        let subject = self
            .hub
            .get_user(user_id)
            .await?
            .public_keys()?
            .ok_or_else(|| AccessError::NotFound(format!("published keys of user {user_id}")))?;

        let signature = sign(own.signing(), &me.id, user_id, &subject)?;
        self.hub
            .put_trust_signature(user_id, signature.0.clone())
            .await?;
        tracing::info!("{} signed the keys of {}", me.id, user_id);
        Ok(signature)
    }
}

/// Holds the verified trust map for the lifetime of a session
pub struct CachingWotService<S> {
    inner: S,
    cached: Mutex<Option<TrustLevels>>,
}

impl<S: WotService> CachingWotService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

#[async_trait]
impl<S: WotService> WotService for CachingWotService<S> {
    async fn trust_levels(&self) -> Result<TrustLevels> {
        let mut cached = self.cached.lock().await;
        if let Some(levels) = cached.as_ref() {
            return Ok(levels.clone());
        }
        let levels = self.inner.trust_levels().await?;
        *cached = Some(levels.clone());
        Ok(levels)
    }

    async fn verify_user(&self, user_id: &str) -> Result<Option<Depth>> {
        self.inner.verify_user(user_id).await
    }

    async fn sign_user(&self, user_id: &str) -> Result<TrustSignature> {
        let signature = self.inner.sign_user(user_id).await?;
        self.invalidate().await;
        Ok(signature)
    }
}
