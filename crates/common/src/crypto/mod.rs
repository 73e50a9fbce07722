//! Cryptographic primitives
//!
//! - **Identity**: every user holds a [`UserKeyPair`]: an X25519 key for key
//!   agreement (published as `ecdhPublicKey`) and an Ed25519 key for
//!   web-of-trust signatures (published as `ecdsaPublicKey`).
//! - **Devices**: every installation holds a [`DeviceKeyPair`] (X25519) that
//!   never leaves the local secret store.
//! - **Key codec**: JWE compact tokens ([`jwe`]) carry every piece of key
//!   material that crosses the hub: user keys wrapped under the Account Key
//!   (Argon2id) or for a device (ECDH-ES), access tokens wrapped for a member,
//!   vault metadata wrapped under the member key.
//! - **Trust signatures**: compact EdDSA JWS ([`jws`]).
//!
//! # Key Sharing Protocol
//!
//! To hand a vault's member key to another user:
//! 1. Generate an ephemeral X25519 key
//! 2. ECDH with the recipient's published key-agreement key
//! 3. Concat KDF the shared secret into an AES-KW key
//! 4. Wrap a random content key, encrypt the payload with AES-256-GCM
//! 5. Ship header (with the ephemeral public key), wrapped key, IV, ciphertext, tag
//!
//! The recipient repeats the agreement with their private key and unwraps.

mod account_key;
pub mod jwe;
pub mod jws;
mod kdf;
mod keys;
mod secret;

pub use account_key::AccountKey;
pub use kdf::{concat_kdf, KdfParams, KeyEncryptionKey};
pub use keys::{
    DeviceKeyPair, EcdhPublicKey, EcdhSecretKey, SigningPublicKey, SigningSecretKey, UserKeyPair,
    UserPublicKeys, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE,
};
pub use secret::{Secret, SECRET_SIZE};

pub(crate) use keys::random_bytes;
