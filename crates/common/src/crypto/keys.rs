use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::Signer;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

use crate::error::SecurityFailure;

/// Size of an X25519 or Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an X25519 or Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

const ECDH_PEM_TAG: &str = "X25519 PRIVATE KEY";
const SIGNING_PEM_TAG: &str = "ED25519 PRIVATE KEY";

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
    bytes
}

fn decode_fixed<const N: usize>(what: &str, b64: &str) -> Result<[u8; N], SecurityFailure> {
    let bytes = Zeroizing::new(
        BASE64
            .decode(b64.trim())
            .map_err(|_| SecurityFailure::Malformed(format!("{what}: invalid base64")))?,
    );
    if bytes.len() != N {
        return Err(SecurityFailure::Malformed(format!(
            "{what}: expected {N} bytes, got {}",
            bytes.len()
        )));
    }
    let mut buff = [0u8; N];
    buff.copy_from_slice(&bytes);
    Ok(buff)
}

macro_rules! base64_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_base64())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::from_base64(&s).map_err(serde::de::Error::custom)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_base64())
            }
        }
    };
}

/// Public half of a key-agreement (X25519) key pair
///
/// Published to the hub as a user's `ecdhPublicKey`, or used locally as a
/// device's public key. Recipients of access tokens and device-specific
/// user keys are addressed by this key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EcdhPublicKey(X25519PublicKey);

impl fmt::Debug for EcdhPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EcdhPublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl From<[u8; PUBLIC_KEY_SIZE]> for EcdhPublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        EcdhPublicKey(X25519PublicKey::from(bytes))
    }
}

impl EcdhPublicKey {
    pub fn from_base64(b64: &str) -> Result<Self, SecurityFailure> {
        Ok(decode_fixed::<PUBLIC_KEY_SIZE>("ecdh public key", b64)?.into())
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub(crate) fn inner(&self) -> &X25519PublicKey {
        &self.0
    }
}

base64_serde!(EcdhPublicKey);

/// Private half of a key-agreement (X25519) key pair
#[derive(Clone)]
pub struct EcdhSecretKey(StaticSecret);

impl fmt::Debug for EcdhSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EcdhSecretKey").field(&self.public()).finish()
    }
}

impl From<[u8; PRIVATE_KEY_SIZE]> for EcdhSecretKey {
    fn from(bytes: [u8; PRIVATE_KEY_SIZE]) -> Self {
        EcdhSecretKey(StaticSecret::from(bytes))
    }
}

impl EcdhSecretKey {
    /// Generate a new random key using the OS RNG
    pub fn generate() -> Self {
        Self::from(random_bytes::<PRIVATE_KEY_SIZE>())
    }

    pub fn public(&self) -> EcdhPublicKey {
        EcdhPublicKey(X25519PublicKey::from(&self.0))
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
        Zeroizing::new(self.0.to_bytes())
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE64.encode(*self.to_bytes()))
    }

    pub fn from_base64(b64: &str) -> Result<Self, SecurityFailure> {
        let bytes = Zeroizing::new(decode_fixed::<PRIVATE_KEY_SIZE>("ecdh private key", b64)?);
        Ok(Self::from(*bytes))
    }

    /// Encode in PEM format for the local secret store
    pub fn to_pem(&self) -> Zeroizing<String> {
        let pem = pem::Pem::new(ECDH_PEM_TAG, self.to_bytes().to_vec());
        Zeroizing::new(pem::encode(&pem))
    }

    pub fn from_pem(pem_str: &str) -> Result<Self, SecurityFailure> {
        let bytes = pem_contents(pem_str, ECDH_PEM_TAG)?;
        Ok(Self::from(*bytes))
    }

    /// Raw X25519 agreement; rejects low-order peer keys
    pub(crate) fn diffie_hellman(
        &self,
        peer: &EcdhPublicKey,
    ) -> Result<SharedSecret, SecurityFailure> {
        let shared = self.0.diffie_hellman(peer.inner());
        if !shared.was_contributory() {
            return Err(SecurityFailure::Crypto(
                "non-contributory key agreement".to_string(),
            ));
        }
        Ok(shared)
    }
}

/// Public half of a signing (Ed25519) key pair, published as `ecdsaPublicKey`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SigningPublicKey(ed25519_dalek::VerifyingKey);

impl fmt::Debug for SigningPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningPublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl TryFrom<[u8; PUBLIC_KEY_SIZE]> for SigningPublicKey {
    type Error = SecurityFailure;
    fn try_from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Result<Self, Self::Error> {
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(SigningPublicKey)
            .map_err(|_| SecurityFailure::Malformed("invalid signing public key".into()))
    }
}

impl SigningPublicKey {
    pub fn from_base64(b64: &str) -> Result<Self, SecurityFailure> {
        decode_fixed::<PUBLIC_KEY_SIZE>("signing public key", b64)?.try_into()
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Verify an Ed25519 signature on a message
    pub fn verify(
        &self,
        msg: &[u8],
        signature: &ed25519_dalek::Signature,
    ) -> Result<(), ed25519_dalek::SignatureError> {
        self.0.verify_strict(msg, signature)
    }
}

base64_serde!(SigningPublicKey);

/// Private half of a signing (Ed25519) key pair
#[derive(Clone)]
pub struct SigningSecretKey(ed25519_dalek::SigningKey);

impl fmt::Debug for SigningSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningSecretKey")
            .field(&self.public())
            .finish()
    }
}

impl From<[u8; PRIVATE_KEY_SIZE]> for SigningSecretKey {
    fn from(bytes: [u8; PRIVATE_KEY_SIZE]) -> Self {
        SigningSecretKey(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }
}

impl SigningSecretKey {
    pub fn generate() -> Self {
        Self::from(random_bytes::<PRIVATE_KEY_SIZE>())
    }

    pub fn public(&self) -> SigningPublicKey {
        SigningPublicKey(self.0.verifying_key())
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
        Zeroizing::new(self.0.to_bytes())
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE64.encode(*self.to_bytes()))
    }

    pub fn from_base64(b64: &str) -> Result<Self, SecurityFailure> {
        let bytes = Zeroizing::new(decode_fixed::<PRIVATE_KEY_SIZE>("signing private key", b64)?);
        Ok(Self::from(*bytes))
    }

    pub fn to_pem(&self) -> Zeroizing<String> {
        let pem = pem::Pem::new(SIGNING_PEM_TAG, self.to_bytes().to_vec());
        Zeroizing::new(pem::encode(&pem))
    }

    pub fn from_pem(pem_str: &str) -> Result<Self, SecurityFailure> {
        let bytes = pem_contents(pem_str, SIGNING_PEM_TAG)?;
        Ok(Self::from(*bytes))
    }

    /// Sign a message, returning a detached signature
    pub fn sign(&self, msg: &[u8]) -> ed25519_dalek::Signature {
        self.0.sign(msg)
    }
}

fn pem_contents(
    pem_str: &str,
    tag: &str,
) -> Result<Zeroizing<[u8; PRIVATE_KEY_SIZE]>, SecurityFailure> {
    let pem = pem::parse(pem_str)
        .map_err(|e| SecurityFailure::Malformed(format!("failed to parse PEM: {e}")))?;

    if pem.tag() != tag {
        return Err(SecurityFailure::Malformed(format!(
            "invalid PEM tag, expected {tag}"
        )));
    }

    let contents = pem.contents();
    if contents.len() != PRIVATE_KEY_SIZE {
        return Err(SecurityFailure::Malformed(format!(
            "invalid private key size in PEM, expected {}, got {}",
            PRIVATE_KEY_SIZE,
            contents.len()
        )));
    }

    let mut bytes = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
    bytes.copy_from_slice(contents);
    Ok(bytes)
}

/// The public keys a user publishes to the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublicKeys {
    pub ecdh_public_key: EcdhPublicKey,
    #[serde(rename = "ecdsaPublicKey")]
    pub signing_public_key: SigningPublicKey,
}

/// Serialized form of a user's private keys, only ever seen inside a JWE
#[derive(Serialize, Deserialize, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct UserPrivateKeys {
    ecdh_private_key: String,
    ecdsa_private_key: String,
}

/// A user's cryptographic identity
///
/// Holds the key-agreement key (access tokens and device-specific user keys
/// are wrapped for it) and the signing key (web-of-trust signatures).
/// The private halves only leave memory inside a JWE: wrapped under the
/// Account Key for the hub, or wrapped for a device key.
#[derive(Debug, Clone)]
pub struct UserKeyPair {
    ecdh: EcdhSecretKey,
    signing: SigningSecretKey,
}

impl UserKeyPair {
    pub fn new(ecdh: EcdhSecretKey, signing: SigningSecretKey) -> Self {
        Self { ecdh, signing }
    }

    pub fn generate() -> Self {
        Self::new(EcdhSecretKey::generate(), SigningSecretKey::generate())
    }

    pub fn ecdh(&self) -> &EcdhSecretKey {
        &self.ecdh
    }

    pub fn signing(&self) -> &SigningSecretKey {
        &self.signing
    }

    pub fn public_keys(&self) -> UserPublicKeys {
        UserPublicKeys {
            ecdh_public_key: self.ecdh.public(),
            signing_public_key: self.signing.public(),
        }
    }

    /// JSON bundle of both private keys, the plaintext of every user-key JWE
    pub fn to_private_json(&self) -> Zeroizing<Vec<u8>> {
        let bundle = UserPrivateKeys {
            ecdh_private_key: self.ecdh.to_base64().to_string(),
            ecdsa_private_key: self.signing.to_base64().to_string(),
        };
        Zeroizing::new(serde_json::to_vec(&bundle).expect("private key bundle serializes"))
    }

    pub fn from_private_json(json: &[u8]) -> Result<Self, SecurityFailure> {
        let bundle: UserPrivateKeys = serde_json::from_slice(json)
            .map_err(|e| SecurityFailure::Malformed(format!("private key bundle: {e}")))?;
        Ok(Self::new(
            EcdhSecretKey::from_base64(&bundle.ecdh_private_key)?,
            SigningSecretKey::from_base64(&bundle.ecdsa_private_key)?,
        ))
    }

    /// Check recovered private keys against the keys published on the hub
    pub fn verify_against(&self, published: &UserPublicKeys) -> Result<(), SecurityFailure> {
        if self.ecdh.public() != published.ecdh_public_key {
            return Err(SecurityFailure::KeyMismatch(
                "ecdh key does not match published public key",
            ));
        }
        if self.signing.public() != published.signing_public_key {
            return Err(SecurityFailure::KeyMismatch(
                "signing key does not match published public key",
            ));
        }
        Ok(())
    }
}

/// A device's key-agreement key pair, kept in the local secret store only
#[derive(Debug, Clone)]
pub struct DeviceKeyPair(EcdhSecretKey);

impl DeviceKeyPair {
    pub fn new(secret: EcdhSecretKey) -> Self {
        Self(secret)
    }

    pub fn generate() -> Self {
        Self(EcdhSecretKey::generate())
    }

    pub fn secret(&self) -> &EcdhSecretKey {
        &self.0
    }

    pub fn public(&self) -> EcdhPublicKey {
        self.0.public()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keys = UserKeyPair::generate();
        let public = keys.public_keys();

        let ecdh_b64 = public.ecdh_public_key.to_base64();
        let recovered = EcdhPublicKey::from_base64(&ecdh_b64).unwrap();
        assert_eq!(public.ecdh_public_key, recovered);

        let signing_b64 = public.signing_public_key.to_base64();
        let recovered = SigningPublicKey::from_base64(&signing_b64).unwrap();
        assert_eq!(public.signing_public_key, recovered);
    }

    #[test]
    fn test_pem_serialization() {
        let secret = EcdhSecretKey::generate();
        let pem = secret.to_pem();
        let recovered = EcdhSecretKey::from_pem(&pem).unwrap();
        assert_eq!(*secret.to_bytes(), *recovered.to_bytes());
        assert_eq!(secret.public(), recovered.public());

        // tags are not interchangeable
        assert!(SigningSecretKey::from_pem(&pem).is_err());
    }

    #[test]
    fn test_private_json_roundtrip() {
        let keys = UserKeyPair::generate();
        let json = keys.to_private_json();
        let recovered = UserKeyPair::from_private_json(&json).unwrap();
        assert!(recovered.verify_against(&keys.public_keys()).is_ok());
    }

    #[test]
    fn test_verify_against_other_user_fails() {
        let keys = UserKeyPair::generate();
        let other = UserKeyPair::generate();
        let err = keys.verify_against(&other.public_keys()).unwrap_err();
        assert!(matches!(err, SecurityFailure::KeyMismatch(_)));
    }

    #[test]
    fn test_sign_and_verify() {
        let secret_key = SigningSecretKey::generate();
        let public_key = secret_key.public();
        let message = b"hello, world!";

        let signature = secret_key.sign(message);
        assert!(public_key.verify(message, &signature).is_ok());
        assert!(public_key.verify(b"hello, world?", &signature).is_err());

        let other_key = SigningSecretKey::generate().public();
        assert!(other_key.verify(message, &signature).is_err());
    }

    #[test]
    fn test_public_keys_serde_names() {
        let keys = UserKeyPair::generate().public_keys();
        let json = serde_json::to_value(keys).unwrap();
        assert!(json.get("ecdhPublicKey").is_some());
        assert!(json.get("ecdsaPublicKey").is_some());
        let back: UserPublicKeys = serde_json::from_value(json).unwrap();
        assert_eq!(keys, back);
    }
}
