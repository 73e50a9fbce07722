//! Key derivation
//!
//! - **Argon2id** turns an Account Key into a key encryption key. The salt and
//!   work factors are carried in the JWE header of every token the key
//!   produces, so unwrapping only needs the Account Key.
//! - **Concat KDF** (NIST SP 800-56A, as profiled by RFC 7518 §4.6) turns an
//!   X25519 shared secret into the AES-KW key for `ECDH-ES+A256KW`.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::keys::random_bytes;
use super::secret::{Secret, SECRET_SIZE};
use crate::error::SecurityFailure;

/// Argon2id memory cost in KiB (64 MiB)
pub const ARGON2_MEMORY_KIB: u32 = 65_536;
/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 3;
/// Argon2id parallelism (lanes)
pub const ARGON2_PARALLELISM: u32 = 4;
/// Salt length for password-based key derivation
pub const SALT_LEN: usize = 16;

/// Largest Argon2id memory cost accepted from a token header (1 GiB)
pub const MAX_MEMORY_KIB: u32 = 1_048_576;
/// Largest Argon2id iteration count accepted from a token header
pub const MAX_ITERATIONS: u32 = 16;
/// Largest Argon2id parallelism accepted from a token header
pub const MAX_PARALLELISM: u32 = 16;

/// Argon2id work factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_memory_kib() -> u32 {
    ARGON2_MEMORY_KIB
}

fn default_iterations() -> u32 {
    ARGON2_ITERATIONS
}

fn default_parallelism() -> u32 {
    ARGON2_PARALLELISM
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: ARGON2_MEMORY_KIB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never use these for real keys.
    pub fn insecure_for_tests() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Reject work factors above the fixed ceilings
    ///
    /// Token headers come from the hub, and the derivation runs before any
    /// integrity check, so this must pass before deriving from a header.
    pub fn check_limits(&self) -> Result<(), SecurityFailure> {
        if self.memory_kib > MAX_MEMORY_KIB
            || self.iterations > MAX_ITERATIONS
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(SecurityFailure::Malformed(format!(
                "Argon2 work factors out of range: m={} t={} p={}",
                self.memory_kib, self.iterations, self.parallelism
            )));
        }
        Ok(())
    }

    fn argon2(&self) -> Result<Argon2<'static>, SecurityFailure> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(SECRET_SIZE),
        )
        .map_err(|e| SecurityFailure::Crypto(format!("invalid Argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// A key encryption key derived from an Account Key
///
/// Remembers the salt and work factors it was derived with so that
/// [`jwe::wrap`](super::jwe::wrap) can publish them alongside the ciphertext.
#[derive(Debug, Clone)]
pub struct KeyEncryptionKey {
    key: Secret,
    salt: [u8; SALT_LEN],
    params: KdfParams,
}

impl KeyEncryptionKey {
    /// Derive a fresh key with a random salt
    pub fn derive(password: &str, params: &KdfParams) -> Result<Self, SecurityFailure> {
        Self::derive_with_salt(password, random_bytes::<SALT_LEN>(), params)
    }

    /// Re-derive a key from the salt and work factors of an existing token
    pub fn derive_with_salt(
        password: &str,
        salt: [u8; SALT_LEN],
        params: &KdfParams,
    ) -> Result<Self, SecurityFailure> {
        let mut key = [0u8; SECRET_SIZE];
        params
            .argon2()?
            .hash_password_into(password.as_bytes(), &salt, &mut key)
            .map_err(|e| SecurityFailure::Crypto(format!("key derivation failed: {e}")))?;
        let key = Secret::from(key);
        Ok(Self {
            key,
            salt,
            params: *params,
        })
    }

    pub fn key(&self) -> &Secret {
        &self.key
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }
}

/// Single-round Concat KDF with SHA-256, producing a 256-bit key
///
/// `OtherInfo = AlgorithmID || PartyUInfo || PartyVInfo || SuppPubInfo`,
/// each of the first three length-prefixed (32-bit big endian), with empty
/// party infos and `SuppPubInfo` = key length in bits.
pub fn concat_kdf(shared_secret: &[u8], algorithm: &str) -> Secret {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(shared_secret);
    hasher.update((algorithm.len() as u32).to_be_bytes());
    hasher.update(algorithm.as_bytes());
    hasher.update(0u32.to_be_bytes());
    hasher.update(0u32.to_be_bytes());
    hasher.update(((SECRET_SIZE * 8) as u32).to_be_bytes());
    let digest: [u8; SECRET_SIZE] = hasher.finalize().into();
    Secret::from(digest)
}
