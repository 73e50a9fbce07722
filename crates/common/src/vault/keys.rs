use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use base64::Engine;

use crate::crypto::Secret;
use crate::error::SecurityFailure;

pub const KDF_SALT_SIZE: usize = 32;

/// Symmetric key shared by every member of a vault
///
/// Wraps the vault metadata; handed to members inside access tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberKey(Secret);

/// Owner-only key that can restore access when every member key holder is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryKey(Secret);

macro_rules! vault_key {
    ($ty:ident) => {
        impl $ty {
            pub fn generate() -> Self {
                Self(Secret::generate())
            }

            pub fn secret(&self) -> &Secret {
                &self.0
            }
        }

        impl From<Secret> for $ty {
            fn from(secret: Secret) -> Self {
                Self(secret)
            }
        }
    };
}

vault_key!(MemberKey);
vault_key!(RecoveryKey);

/// Content-encryption seeds of a vault
///
/// Files are encrypted with the latest seed; older seeds stay around to
/// decrypt what was written before a rotation. The initial seed and the KDF
/// salt pin down the root directory id and never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSet {
    seeds: BTreeMap<u32, Secret>,
    initial: u32,
    latest: u32,
    kdf_salt: [u8; KDF_SALT_SIZE],
}

impl SeedSet {
    pub fn generate() -> Self {
        let id = random_seed_id();
        let mut seeds = BTreeMap::new();
        seeds.insert(id, Secret::generate());
        Self {
            seeds,
            initial: id,
            latest: id,
            kdf_salt: crate::crypto::random_bytes(),
        }
    }

    pub(crate) fn from_parts(
        seeds: BTreeMap<u32, Secret>,
        initial: u32,
        latest: u32,
        kdf_salt: [u8; KDF_SALT_SIZE],
    ) -> Result<Self, SecurityFailure> {
        if !seeds.contains_key(&initial) || !seeds.contains_key(&latest) {
            return Err(SecurityFailure::Malformed(
                "initial or latest seed missing from seed set".into(),
            ));
        }
        Ok(Self {
            seeds,
            initial,
            latest,
            kdf_salt,
        })
    }

    /// Add a fresh seed and make it the latest; returns its id
    pub fn rotate(&mut self) -> u32 {
        let id = loop {
            let candidate = random_seed_id();
            if !self.seeds.contains_key(&candidate) {
                break candidate;
            }
        };
        self.seeds.insert(id, Secret::generate());
        self.latest = id;
        id
    }

    pub fn seeds(&self) -> &BTreeMap<u32, Secret> {
        &self.seeds
    }

    pub fn get(&self, id: u32) -> Option<&Secret> {
        self.seeds.get(&id)
    }

    pub fn initial_id(&self) -> u32 {
        self.initial
    }

    pub fn latest_id(&self) -> u32 {
        self.latest
    }

    pub fn initial_seed(&self) -> &Secret {
        &self.seeds[&self.initial]
    }

    pub fn latest_seed(&self) -> &Secret {
        &self.seeds[&self.latest]
    }

    pub fn kdf_salt(&self) -> &[u8; KDF_SALT_SIZE] {
        &self.kdf_salt
    }
}

fn random_seed_id() -> u32 {
    let bytes: [u8; 4] = crate::crypto::random_bytes();
    u32::from_be_bytes(bytes)
}

/// Seed ids are rendered as base64url of their big-endian bytes
pub(crate) fn encode_seed_id(id: u32) -> String {
    B64URL.encode(id.to_be_bytes())
}

pub(crate) fn decode_seed_id(encoded: &str) -> Result<u32, SecurityFailure> {
    let bytes: [u8; 4] = B64URL
        .decode(encoded)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| SecurityFailure::Malformed(format!("invalid seed id {encoded:?}")))?;
    Ok(u32::from_be_bytes(bytes))
}

/// Everything generated when a vault is created
#[derive(Debug, Clone)]
pub struct VaultKeys {
    pub member_key: MemberKey,
    pub recovery_key: RecoveryKey,
    pub seeds: SeedSet,
}

pub fn create_vault_keys() -> VaultKeys {
    VaultKeys {
        member_key: MemberKey::generate(),
        recovery_key: RecoveryKey::generate(),
        seeds: SeedSet::generate(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_vault_has_single_seed() {
        let keys = create_vault_keys();
        assert_eq!(keys.seeds.seeds().len(), 1);
        assert_eq!(keys.seeds.initial_id(), keys.seeds.latest_id());
        assert_ne!(keys.member_key.secret(), keys.recovery_key.secret());
    }

    #[test]
    fn test_rotate_keeps_initial_seed() {
        let mut seeds = SeedSet::generate();
        let initial = seeds.initial_seed().clone();
        let new_id = seeds.rotate();

        assert_eq!(seeds.latest_id(), new_id);
        assert_eq!(seeds.initial_seed(), &initial);
        assert_ne!(seeds.latest_seed(), &initial);
        assert_eq!(seeds.seeds().len(), 2);
    }

    #[test]
    fn test_seed_id_encoding() {
        assert_eq!(decode_seed_id(&encode_seed_id(0xDEAD_BEEF)).unwrap(), 0xDEAD_BEEF);
        assert!(decode_seed_id("not a seed id").is_err());
    }
}
