//! Vault metadata (UVF payload)
//!
//! Serialized as JSON with a fixed field order and sorted seed map, then
//! wrapped under the vault's member key (`alg = A256KW`).

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::{decode_seed_id, encode_seed_id, MemberKey, SeedSet, KDF_SALT_SIZE};
use crate::crypto::{jwe, Secret};
use crate::error::SecurityFailure;
use crate::wot::Depth;

pub const UVF_SPEC_VERSION: u32 = 1;

/// Where the vault's encrypted files live
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDescriptor {
    pub provider: String,
    pub default_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_credentials: Option<StaticCredentials>,
}

impl fmt::Debug for StorageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageDescriptor")
            .field("provider", &self.provider)
            .field("default_path", &self.default_path)
            .field("region", &self.region)
            .field(
                "static_credentials",
                &self.static_credentials.as_ref().map(|c| &c.access_key_id),
            )
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Per-vault switch for granting access without the owner's involvement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticAccessGrantConfig {
    pub enabled: bool,
    /// Deepest trust chain that still qualifies; negative means not configured
    pub max_wot_depth: i32,
}

impl Default for AutomaticAccessGrantConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_wot_depth: -1,
        }
    }
}

impl AutomaticAccessGrantConfig {
    pub fn enabled_with_depth(max_wot_depth: Depth) -> Self {
        Self {
            enabled: true,
            max_wot_depth: i32::try_from(max_wot_depth).unwrap_or(i32::MAX),
        }
    }

    /// The depth limit to apply, or `None` if automatic granting is off
    pub fn max_depth(&self) -> Option<Depth> {
        if !self.enabled {
            return None;
        }
        Depth::try_from(self.max_wot_depth).ok()
    }
}

/// Decrypted vault metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultMetadata {
    pub seeds: SeedSet,
    pub storage: StorageDescriptor,
    pub automatic_access_grant: AutomaticAccessGrantConfig,
}

/// Wire form; field order is the serialization order
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataPayload {
    uvf_spec_version: u32,
    seeds: BTreeMap<String, String>,
    initial_seed: String,
    latest_seed: String,
    kdf_salt: String,
    storage: StorageDescriptor,
    automatic_access_grant: AutomaticAccessGrantConfig,
}

impl MetadataPayload {
    fn new(
        seeds: &SeedSet,
        storage: &StorageDescriptor,
        grant: &AutomaticAccessGrantConfig,
    ) -> Self {
        Self {
            uvf_spec_version: UVF_SPEC_VERSION,
            seeds: seeds
                .seeds()
                .iter()
                .map(|(id, seed)| (encode_seed_id(*id), seed.to_base64()))
                .collect(),
            initial_seed: encode_seed_id(seeds.initial_id()),
            latest_seed: encode_seed_id(seeds.latest_id()),
            kdf_salt: BASE64.encode(seeds.kdf_salt()),
            storage: storage.clone(),
            automatic_access_grant: *grant,
        }
    }

    fn into_metadata(self) -> Result<VaultMetadata, SecurityFailure> {
        if self.uvf_spec_version != UVF_SPEC_VERSION {
            return Err(SecurityFailure::UnsupportedAlgorithm(format!(
                "uvf spec version {}",
                self.uvf_spec_version
            )));
        }

        let mut seeds = BTreeMap::new();
        for (id, seed) in &self.seeds {
            seeds.insert(decode_seed_id(id)?, Secret::from_base64(seed)?);
        }
        let kdf_salt: [u8; KDF_SALT_SIZE] = BASE64
            .decode(&self.kdf_salt)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| SecurityFailure::Malformed("invalid kdf salt".into()))?;

        Ok(VaultMetadata {
            seeds: SeedSet::from_parts(
                seeds,
                decode_seed_id(&self.initial_seed)?,
                decode_seed_id(&self.latest_seed)?,
                kdf_salt,
            )?,
            storage: self.storage,
            automatic_access_grant: self.automatic_access_grant,
        })
    }
}

/// Serialize and wrap the metadata under the member key
pub fn encrypt_metadata(
    storage: &StorageDescriptor,
    grant: &AutomaticAccessGrantConfig,
    seeds: &SeedSet,
    member_key: &MemberKey,
) -> Result<String, SecurityFailure> {
    let payload = MetadataPayload::new(seeds, storage, grant);
    let json = Zeroizing::new(
        serde_json::to_vec(&payload)
            .map_err(|e| SecurityFailure::Crypto(format!("encode vault metadata: {e}")))?,
    );
    jwe::wrap_with_key(&json, member_key.secret())
}

pub fn decrypt_metadata(
    payload: &str,
    member_key: &MemberKey,
) -> Result<VaultMetadata, SecurityFailure> {
    let json = jwe::unwrap_with_key(payload, member_key.secret())?;
    let payload: MetadataPayload = serde_json::from_slice(&json)
        .map_err(|e| SecurityFailure::Malformed(format!("vault metadata: {e}")))?;
    payload.into_metadata()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vault::create_vault_keys;

    fn storage() -> StorageDescriptor {
        StorageDescriptor {
            provider: "s3".into(),
            default_path: "vaults/team".into(),
            region: Some("eu-central-1".into()),
            static_credentials: Some(StaticCredentials {
                access_key_id: "AKIA".into(),
                secret_access_key: "hunter2".into(),
            }),
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut keys = create_vault_keys();
        keys.seeds.rotate();
        let grant = AutomaticAccessGrantConfig::enabled_with_depth(2);

        let token = encrypt_metadata(&storage(), &grant, &keys.seeds, &keys.member_key).unwrap();
        let metadata = decrypt_metadata(&token, &keys.member_key).unwrap();

        assert_eq!(metadata.seeds, keys.seeds);
        assert_eq!(metadata.storage, storage());
        assert_eq!(metadata.automatic_access_grant, grant);
    }

    #[test]
    fn test_wrong_member_key_fails() {
        let keys = create_vault_keys();
        let token = encrypt_metadata(
            &storage(),
            &AutomaticAccessGrantConfig::default(),
            &keys.seeds,
            &keys.member_key,
        )
        .unwrap();
        assert!(matches!(
            decrypt_metadata(&token, &MemberKey::generate()),
            Err(SecurityFailure::Integrity(_))
        ));
    }

    #[test]
    fn test_max_depth() {
        assert_eq!(AutomaticAccessGrantConfig::default().max_depth(), None);
        assert_eq!(
            AutomaticAccessGrantConfig {
                enabled: true,
                max_wot_depth: -1
            }
            .max_depth(),
            None
        );
        assert_eq!(
            AutomaticAccessGrantConfig {
                enabled: false,
                max_wot_depth: 3
            }
            .max_depth(),
            None
        );
        assert_eq!(
            AutomaticAccessGrantConfig::enabled_with_depth(0).max_depth(),
            Some(0)
        );
    }

    #[test]
    fn test_debug_hides_credentials() {
        assert!(!format!("{:?}", storage()).contains("hunter2"));
    }
}
