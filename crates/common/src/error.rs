//! Error model shared by every service in the crate.
//!
//! Everything that can go wrong falls into one of two kinds:
//!
//! - [`AccessError`]: the operation cannot proceed right now (user cancelled a
//!   prompt, a resource is missing, the hub refused or failed the request, the
//!   local secret store denied access). Callers may re-prompt, re-authenticate
//!   or retry.
//! - [`SecurityFailure`]: a cryptographic check failed (authentication tag,
//!   key mismatch, signature or trust chain). Never downgraded to a warning.

use uuid::Uuid;

use crate::device::SecretStoreError;
use crate::hub::HubApiError;
use crate::prompt::PromptError;

/// Top-level error returned by the services in this crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("access error: {0}")]
    Access(#[from] AccessError),
    #[error("security failure: {0}")]
    Security(#[from] SecurityFailure),
}

impl Error {
    pub fn is_access(&self) -> bool {
        matches!(self, Error::Access(_))
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Error::Security(_))
    }

    /// True when a wrong Account Key (or any wrong password-derived key)
    /// was used, as opposed to a malformed or tampered-with token
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::Security(SecurityFailure::Integrity(_)))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The operation could not proceed; recoverable by the caller
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The user dismissed an interactive prompt
    #[error("cancelled by user")]
    Cancelled,
    #[error("not found: {0}")]
    NotFound(String),
    /// No access token exists for the current user on this vault
    #[error("not a member of vault {0}")]
    NotMember(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("hub request failed: {0}")]
    Hub(#[source] anyhow::Error),
    #[error("prompt failed: {0}")]
    Prompt(#[source] anyhow::Error),
    #[error("local secret store: {0}")]
    SecretStore(#[from] SecretStoreError),
}

/// A cryptographic verification or decryption failed
#[derive(Debug, thiserror::Error)]
pub enum SecurityFailure {
    /// Authentication tag or key-wrap integrity check mismatch
    #[error("integrity check failed: {0}")]
    Integrity(&'static str),
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Recovered key material does not match the published public keys
    #[error("key mismatch: {0}")]
    KeyMismatch(&'static str),
    #[error("invalid signature at chain index {0}")]
    InvalidSignature(usize),
    #[error("broken trust chain at index {0}: {1}")]
    BrokenChain(usize, &'static str),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<HubApiError> for AccessError {
    fn from(err: HubApiError) -> Self {
        match err {
            HubApiError::NotFound(what) => AccessError::NotFound(what),
            HubApiError::Forbidden(what) => AccessError::Forbidden(what),
            HubApiError::Other(e) => AccessError::Hub(e),
        }
    }
}

impl From<HubApiError> for Error {
    fn from(err: HubApiError) -> Self {
        Error::Access(err.into())
    }
}

impl From<PromptError> for Error {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::Cancelled => Error::Access(AccessError::Cancelled),
            PromptError::Other(e) => Error::Access(AccessError::Prompt(e)),
        }
    }
}

impl From<SecretStoreError> for Error {
    fn from(err: SecretStoreError) -> Self {
        Error::Access(AccessError::SecretStore(err))
    }
}
