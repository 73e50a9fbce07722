//! JWE compact serialization (the key codec)
//!
//! Every token is `header.encrypted_key.iv.ciphertext.tag` (base64url, no
//! padding). The content is always encrypted with `A256GCM` under a random
//! content encryption key (CEK); the CEK is wrapped with AES-KW (RFC 3394)
//! under a key encryption key obtained one of three ways:
//!
//! | `alg`              | key encryption key                                  |
//! |--------------------|-----------------------------------------------------|
//! | `A256KW`           | a 256-bit [`Secret`] held by the caller              |
//! | `ARGON2ID+A256KW`  | Argon2id(password), salt and cost in `p2s/p2c/p2m/p2p` |
//! | `ECDH-ES+A256KW`   | Concat KDF over X25519(ephemeral, recipient), `epk` in header |
//!
//! The encoded protected header is the AAD, so any change to any part of a
//! token makes decryption fail.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use aes_kw::KekAes256 as Kek;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::kdf::{concat_kdf, KdfParams, KeyEncryptionKey, SALT_LEN};
use super::keys::{random_bytes, EcdhPublicKey, EcdhSecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SECRET_SIZE};
use crate::error::SecurityFailure;

pub const ALG_A256KW: &str = "A256KW";
pub const ALG_ARGON2ID_A256KW: &str = "ARGON2ID+A256KW";
pub const ALG_ECDH_ES_A256KW: &str = "ECDH-ES+A256KW";
pub const ENC_A256GCM: &str = "A256GCM";

/// Size of the AES-GCM IV in bytes
pub const IV_SIZE: usize = 12;
/// Size of the AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Ephemeral public key in JWK form (RFC 8037)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EphemeralJwk {
    kty: String,
    crv: String,
    x: String,
}

impl EphemeralJwk {
    fn from_key(key: &EcdhPublicKey) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "X25519".to_string(),
            x: B64URL.encode(key.to_bytes()),
        }
    }

    fn to_key(&self) -> Result<EcdhPublicKey, SecurityFailure> {
        if self.kty != "OKP" || self.crv != "X25519" {
            return Err(SecurityFailure::UnsupportedAlgorithm(format!(
                "epk {}/{}",
                self.kty, self.crv
            )));
        }
        let bytes: [u8; PUBLIC_KEY_SIZE] = decode_segment("epk", &self.x)?
            .try_into()
            .map_err(|_| SecurityFailure::Malformed("epk: wrong key size".into()))?;
        Ok(EcdhPublicKey::from(bytes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    alg: String,
    enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    epk: Option<EphemeralJwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p2s: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p2c: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p2m: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p2p: Option<u32>,
}

impl Header {
    fn new(alg: &str) -> Self {
        Self {
            alg: alg.to_string(),
            enc: ENC_A256GCM.to_string(),
            epk: None,
            p2s: None,
            p2c: None,
            p2m: None,
            p2p: None,
        }
    }
}

/// A parsed, not yet decrypted, compact JWE
struct Compact<'a> {
    header_b64: &'a str,
    header: Header,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

fn decode_segment(what: &str, segment: &str) -> Result<Vec<u8>, SecurityFailure> {
    B64URL
        .decode(segment)
        .map_err(|_| SecurityFailure::Malformed(format!("{what}: invalid base64url")))
}

impl<'a> Compact<'a> {
    fn parse(token: &'a str, expected_alg: &str) -> Result<Self, SecurityFailure> {
        let parts: Vec<&str> = token.trim().split('.').collect();
        let [header_b64, encrypted_key, iv, ciphertext, tag] = parts[..] else {
            return Err(SecurityFailure::Malformed(format!(
                "expected 5 JWE segments, got {}",
                parts.len()
            )));
        };

        let header: Header = serde_json::from_slice(&decode_segment("header", header_b64)?)
            .map_err(|e| SecurityFailure::Malformed(format!("header: {e}")))?;
        if header.alg != expected_alg {
            return Err(SecurityFailure::UnsupportedAlgorithm(header.alg));
        }
        if header.enc != ENC_A256GCM {
            return Err(SecurityFailure::UnsupportedAlgorithm(header.enc));
        }

        let compact = Self {
            header_b64,
            header,
            encrypted_key: decode_segment("encrypted key", encrypted_key)?,
            iv: decode_segment("iv", iv)?,
            ciphertext: decode_segment("ciphertext", ciphertext)?,
            tag: decode_segment("tag", tag)?,
        };
        if compact.iv.len() != IV_SIZE || compact.tag.len() != TAG_SIZE {
            return Err(SecurityFailure::Malformed("bad iv or tag length".into()));
        }
        Ok(compact)
    }

    fn decrypt(&self, kek: &Secret) -> Result<Zeroizing<Vec<u8>>, SecurityFailure> {
        let cek = Zeroizing::new(
            Kek::from(*kek.bytes())
                .unwrap_vec(&self.encrypted_key)
                .map_err(|_| SecurityFailure::Integrity("content key unwrap failed"))?,
        );
        if cek.len() != SECRET_SIZE {
            return Err(SecurityFailure::Malformed("content key has wrong size".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(&cek)
            .map_err(|_| SecurityFailure::Crypto("invalid content key".into()))?;
        let mut sealed = Vec::with_capacity(self.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&self.iv),
                Payload {
                    msg: &sealed,
                    aad: self.header_b64.as_bytes(),
                },
            )
            .map_err(|_| SecurityFailure::Integrity("authentication tag mismatch"))?;
        Ok(Zeroizing::new(plaintext))
    }
}

fn encrypt(header: &Header, kek: &Secret, plaintext: &[u8]) -> Result<String, SecurityFailure> {
    let cek = Secret::generate();
    let encrypted_key = Kek::from(*kek.bytes())
        .wrap_vec(cek.bytes())
        .map_err(|_| SecurityFailure::Crypto("AES-KW wrap error".into()))?;

    let header_json = serde_json::to_vec(header)
        .map_err(|e| SecurityFailure::Crypto(format!("header encode: {e}")))?;
    let header_b64 = B64URL.encode(header_json);

    let iv = random_bytes::<IV_SIZE>();
    let cipher = Aes256Gcm::new_from_slice(cek.bytes())
        .map_err(|_| SecurityFailure::Crypto("invalid content key".into()))?;
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|_| SecurityFailure::Crypto("encrypt error".into()))?;
    let tag = sealed.split_off(sealed.len() - TAG_SIZE);

    Ok(format!(
        "{}.{}.{}.{}.{}",
        header_b64,
        B64URL.encode(encrypted_key),
        B64URL.encode(iv),
        B64URL.encode(sealed),
        B64URL.encode(tag)
    ))
}

/// Encrypt key material under a password-derived key
///
/// The salt and Argon2id work factors of `kek` are embedded in the header.
pub fn wrap(plaintext: &[u8], kek: &KeyEncryptionKey) -> Result<String, SecurityFailure> {
    let mut header = Header::new(ALG_ARGON2ID_A256KW);
    header.p2s = Some(B64URL.encode(kek.salt()));
    header.p2c = Some(kek.params().iterations);
    header.p2m = Some(kek.params().memory_kib);
    header.p2p = Some(kek.params().parallelism);
    encrypt(&header, kek.key(), plaintext)
}

/// Decrypt a token produced by [`wrap`], re-deriving the key from `password`
///
/// A wrong password fails with [`SecurityFailure::Integrity`].
pub fn unwrap(token: &str, password: &str) -> Result<Zeroizing<Vec<u8>>, SecurityFailure> {
    let compact = Compact::parse(token, ALG_ARGON2ID_A256KW)?;
    let header = &compact.header;

    let salt: [u8; SALT_LEN] = decode_segment(
        "p2s",
        header
            .p2s
            .as_deref()
            .ok_or_else(|| SecurityFailure::Malformed("missing p2s".into()))?,
    )?
    .try_into()
    .map_err(|_| SecurityFailure::Malformed("p2s: wrong salt size".into()))?;

    let (Some(iterations), Some(memory_kib), Some(parallelism)) =
        (header.p2c, header.p2m, header.p2p)
    else {
        return Err(SecurityFailure::Malformed("missing work factors".into()));
    };
    let params = KdfParams {
        memory_kib,
        iterations,
        parallelism,
    };
    params.check_limits()?;

    let kek = KeyEncryptionKey::derive_with_salt(password, salt, &params)?;
    compact.decrypt(kek.key())
}

/// Encrypt under a symmetric key held by the caller (e.g. a vault member key)
pub fn wrap_with_key(plaintext: &[u8], key: &Secret) -> Result<String, SecurityFailure> {
    encrypt(&Header::new(ALG_A256KW), key, plaintext)
}

pub fn unwrap_with_key(token: &str, key: &Secret) -> Result<Zeroizing<Vec<u8>>, SecurityFailure> {
    Compact::parse(token, ALG_A256KW)?.decrypt(key)
}

/// Encrypt for a recipient's key-agreement public key with a fresh ephemeral key
pub fn ecdh_wrap(plaintext: &[u8], recipient: &EcdhPublicKey) -> Result<String, SecurityFailure> {
    ecdh_wrap_with(plaintext, recipient, &EcdhSecretKey::generate())
}

/// Encrypt for a recipient using the given ephemeral key
///
/// The ephemeral key must not be reused across recipients or messages.
pub fn ecdh_wrap_with(
    plaintext: &[u8],
    recipient: &EcdhPublicKey,
    ephemeral: &EcdhSecretKey,
) -> Result<String, SecurityFailure> {
    let shared = ephemeral.diffie_hellman(recipient)?;
    let kek = concat_kdf(shared.as_bytes(), ALG_ECDH_ES_A256KW);

    let mut header = Header::new(ALG_ECDH_ES_A256KW);
    header.epk = Some(EphemeralJwk::from_key(&ephemeral.public()));
    encrypt(&header, &kek, plaintext)
}

/// Decrypt a token produced by [`ecdh_wrap`] with the recipient's private key
pub fn ecdh_unwrap(
    token: &str,
    recipient: &EcdhSecretKey,
) -> Result<Zeroizing<Vec<u8>>, SecurityFailure> {
    let compact = Compact::parse(token, ALG_ECDH_ES_A256KW)?;
    let ephemeral = compact
        .header
        .epk
        .as_ref()
        .ok_or_else(|| SecurityFailure::Malformed("missing epk".into()))?
        .to_key()?;

    let shared = recipient.diffie_hellman(&ephemeral)?;
    let kek = concat_kdf(shared.as_bytes(), ALG_ECDH_ES_A256KW);
    compact.decrypt(&kek)
}

#[cfg(test)]
mod test {
    use super::*;

    fn tampered(token: &str, index: usize) -> String {
        let mut bytes = token.as_bytes().to_vec();
        bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_password_roundtrip() {
        let params = KdfParams::insecure_for_tests();
        let kek = KeyEncryptionKey::derive("ABCD-EFGH", &params).unwrap();
        let token = wrap(b"private keys", &kek).unwrap();
        let plaintext = unwrap(&token, "ABCD-EFGH").unwrap();
        assert_eq!(plaintext.as_slice(), b"private keys");
    }

    #[test]
    fn test_wrong_password_is_integrity_failure() {
        let params = KdfParams::insecure_for_tests();
        let kek = KeyEncryptionKey::derive("right", &params).unwrap();
        let token = wrap(b"private keys", &kek).unwrap();
        let err = unwrap(&token, "wrong").unwrap_err();
        assert!(matches!(err, SecurityFailure::Integrity(_)), "{err:?}");
    }

    fn with_header_field(token: &str, field: &str, value: u64) -> String {
        let (header_b64, rest) = token.split_once('.').unwrap();
        let mut header: serde_json::Value =
            serde_json::from_slice(&B64URL.decode(header_b64).unwrap()).unwrap();
        header[field] = value.into();
        let header_b64 = B64URL.encode(serde_json::to_vec(&header).unwrap());
        format!("{header_b64}.{rest}")
    }

    #[test]
    fn test_inflated_work_factors_rejected_before_derivation() {
        let params = KdfParams::insecure_for_tests();
        let kek = KeyEncryptionKey::derive("ABCD-EFGH", &params).unwrap();
        let token = wrap(b"private keys", &kek).unwrap();

        for (field, value) in [
            ("p2m", u64::from(u32::MAX)),
            ("p2m", 524_288 * 4),
            ("p2c", 1_000_000),
            ("p2p", 1_024),
        ] {
            let inflated = with_header_field(&token, field, value);
            let started = std::time::Instant::now();
            let err = unwrap(&inflated, "ABCD-EFGH").unwrap_err();
            assert!(matches!(err, SecurityFailure::Malformed(_)), "{field}: {err:?}");
            assert!(started.elapsed() < std::time::Duration::from_secs(1));
        }
    }

    #[test]
    fn test_symmetric_roundtrip() {
        let key = Secret::generate();
        let token = wrap_with_key(b"{\"seeds\":{}}", &key).unwrap();
        assert_eq!(
            unwrap_with_key(&token, &key).unwrap().as_slice(),
            b"{\"seeds\":{}}"
        );
        assert!(matches!(
            unwrap_with_key(&token, &Secret::generate()),
            Err(SecurityFailure::Integrity(_))
        ));
    }

    #[test]
    fn test_fresh_iv_and_cek_per_encryption() {
        let key = Secret::generate();
        let a = wrap_with_key(b"same", &key).unwrap();
        let b = wrap_with_key(b"same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ecdh_roundtrip() {
        let device = EcdhSecretKey::generate();
        let token = ecdh_wrap(b"user keys", &device.public()).unwrap();
        let plaintext = ecdh_unwrap(&token, &device).unwrap();
        assert_eq!(plaintext.as_slice(), b"user keys");
    }

    #[test]
    fn test_ecdh_wrong_recipient_fails() {
        let alice = EcdhSecretKey::generate();
        let bob = EcdhSecretKey::generate();
        let token = ecdh_wrap(b"member key", &alice.public()).unwrap();
        assert!(matches!(
            ecdh_unwrap(&token, &bob),
            Err(SecurityFailure::Integrity(_))
        ));
    }

    #[test]
    fn test_ecdh_any_single_byte_change_fails() {
        let device = EcdhSecretKey::generate();
        let token = ecdh_wrap(b"user keys", &device.public()).unwrap();
        for index in 0..token.len() {
            let bad = tampered(&token, index);
            assert!(
                ecdh_unwrap(&bad, &device).is_err(),
                "tampering at {index} went unnoticed"
            );
        }
    }

    #[test]
    fn test_algorithm_confusion_rejected() {
        let key = Secret::generate();
        let token = wrap_with_key(b"x", &key).unwrap();
        let device = EcdhSecretKey::generate();
        assert!(matches!(
            ecdh_unwrap(&token, &device),
            Err(SecurityFailure::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let device = EcdhSecretKey::generate();
        assert!(matches!(
            ecdh_unwrap("not-a-token", &device),
            Err(SecurityFailure::Malformed(_))
        ));
    }
}
