/**
 * Session configuration, loaded from
 *  and saved to TOML.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - User, device and vault keys
 *  - JWE key wrapping, JWS trust signatures
 *  - Account Key derivation
 */
pub mod crypto;
/**
 * Device key pairs and the local
 *  secret store that holds them.
 */
pub mod device;
pub mod error;
/**
 * Automatic access grant: hands vault
 *  member keys to sufficiently trusted
 *  members without the owner present.
 */
pub mod grant;
/**
 * The hub directory API as seen by
 *  this crate. Transport lives elsewhere.
 */
pub mod hub;
pub mod prompt;
/**
 * Per-hub composition of the services
 *  and the grant scheduler.
 */
pub mod session;
/**
 * In-memory hub, prompt and secret store
 *  for tests.
 */
pub mod testkit;
/**
 * Resolving the current user's key pair:
 *  from this device, by recovery, or by
 *  first-time setup.
 */
pub mod user_keys;
/**
 * Vault key material: member and recovery
 *  keys, seeds, metadata, access tokens.
 */
pub mod vault;
/**
 * Web of trust: signing other users' keys
 *  and verifying signature chains.
 */
pub mod wot;

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::crypto::{AccountKey, UserKeyPair, UserPublicKeys};
    pub use crate::device::{DeviceKeyStore, FileSecretStore, SecretStore};
    pub use crate::error::{AccessError, Error, Result, SecurityFailure};
    pub use crate::grant::{AutomaticAccessGrant, GrantReport};
    pub use crate::hub::{HubApi, HubApiError};
    pub use crate::prompt::{Prompt, PromptError};
    pub use crate::session::{GrantDispatcher, GrantTrigger, HubSession};
    pub use crate::user_keys::UserKeyService;
    pub use crate::vault::{AutomaticAccessGrantConfig, StorageDescriptor, VaultCrypto};
    pub use crate::wot::{TrustLevels, WotService};
}
