//! Interactive prompts
//!
//! Asking a human for their Account Key or a device name is the host
//! application's business (console, web form, native dialog). Services only
//! see this capability trait.

use async_trait::async_trait;

use crate::crypto::AccountKey;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// The user dismissed the prompt
    #[error("prompt cancelled")]
    Cancelled,
    #[error("prompt failed: {0}")]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait Prompt: Send + Sync {
    /// Ask for an existing Account Key and a name for this device
    async fn ask_for_account_key_and_device_name(
        &self,
    ) -> Result<(AccountKey, String), PromptError>;

    /// Show a freshly generated Account Key and ask for a name for this device
    async fn display_account_key_and_ask_device_name(
        &self,
        account_key: &AccountKey,
    ) -> Result<String, PromptError>;

    /// Tell the user the Account Key they entered was wrong, before re-asking
    async fn invalid_account_key(&self) {}
}
