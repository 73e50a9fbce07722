//! 256-bit symmetric keys
//!
//! A `Secret` is the raw material behind a vault's member key, recovery key and
//! seeds. It never encrypts anything by itself: it is used as an AES-KW key
//! encryption key by [`jwe`](super::jwe), or as input keying material for
//! BLAKE3 key derivation.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::random_bytes;
use crate::error::SecurityFailure;

/// Size of a symmetric key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;

/// A 256-bit symmetric key
///
/// Zeroed on drop. `Debug` never prints the key bytes.
///
/// # Examples
///
/// ```ignore
/// let member_key = Secret::generate();
/// let token = jwe::wrap_with_key(b"metadata", &member_key)?;
/// ```
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_SIZE]);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Self {
        Self(random_bytes::<SECRET_SIZE>())
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecurityFailure> {
        if data.len() != SECRET_SIZE {
            return Err(SecurityFailure::Malformed(format!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )));
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(b64: &str) -> Result<Self, SecurityFailure> {
        let bytes = zeroize::Zeroizing::new(
            BASE64
                .decode(b64)
                .map_err(|_| SecurityFailure::Malformed("secret: invalid base64".into()))?,
        );
        Self::from_slice(&bytes)
    }

    /// Derive an independent subkey for `context` with BLAKE3's KDF mode
    ///
    /// `context` must be a hardcoded, globally unique string.
    pub fn derive(&self, context: &str, salt: &[u8]) -> Secret {
        let mut material = zeroize::Zeroizing::new(Vec::with_capacity(salt.len() + SECRET_SIZE));
        material.extend_from_slice(salt);
        material.extend_from_slice(&self.0);
        Secret(blake3::derive_key(context, &material))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_secret_size_validation() {
        let too_short = [1u8; 16];
        let too_long = [1u8; 64];

        assert!(Secret::from_slice(&too_short).is_err());
        assert!(Secret::from_slice(&too_long).is_err());

        let just_right = [1u8; SECRET_SIZE];
        assert!(Secret::from_slice(&just_right).is_ok());
    }

    #[test]
    fn test_base64_roundtrip() {
        let secret = Secret::generate();
        let recovered = Secret::from_base64(&secret.to_base64()).unwrap();
        assert_eq!(secret, recovered);
    }

    #[test]
    fn test_derive_is_deterministic_and_context_bound() {
        let secret = Secret::from([7u8; SECRET_SIZE]);
        let salt = [1u8; 32];
        let a = secret.derive("hubvault test context a", &salt);
        let b = secret.derive("hubvault test context a", &salt);
        let c = secret.derive("hubvault test context b", &salt);
        let d = secret.derive("hubvault test context a", &[2u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_debug_hides_bytes() {
        let secret = Secret::from([0xABu8; SECRET_SIZE]);
        assert_eq!(format!("{secret:?}"), "Secret(..)");
    }
}
