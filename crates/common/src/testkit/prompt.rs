use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crypto::AccountKey;
use crate::prompt::{Prompt, PromptError};

/// Answers prompts without a human
///
/// Account Keys entered for recovery come from a queue; an empty queue
/// cancels. Account Keys shown during setup are recorded so a test can
/// "write them down" and recover on another device.
#[derive(Debug)]
pub struct ScriptedPrompt {
    device_name: String,
    account_keys: Mutex<VecDeque<String>>,
    displayed: Mutex<Vec<String>>,
    cancel_setup: AtomicBool,
    asked: AtomicUsize,
    invalid_notices: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            account_keys: Mutex::new(VecDeque::new()),
            displayed: Mutex::new(Vec::new()),
            cancel_setup: AtomicBool::new(false),
            asked: AtomicUsize::new(0),
            invalid_notices: AtomicUsize::new(0),
        }
    }

    /// Queue an Account Key to type in at the next recovery prompt
    pub fn enter_account_key(&self, account_key: impl Into<String>) {
        self.account_keys.lock().push_back(account_key.into());
    }

    /// Cancel the setup dialog instead of naming the device
    pub fn cancel_setup(&self, cancel: bool) {
        self.cancel_setup.store(cancel, Ordering::SeqCst);
    }

    /// Account Keys shown to the user, oldest first
    pub fn displayed_account_keys(&self) -> Vec<String> {
        self.displayed.lock().clone()
    }

    /// How often the user was asked to enter an Account Key
    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }

    pub fn invalid_account_key_notices(&self) -> usize {
        self.invalid_notices.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prompt for ScriptedPrompt {
    async fn ask_for_account_key_and_device_name(
        &self,
    ) -> Result<(AccountKey, String), PromptError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        let entered = self
            .account_keys
            .lock()
            .pop_front()
            .ok_or(PromptError::Cancelled)?;
        Ok((AccountKey::parse(&entered), self.device_name.clone()))
    }

    async fn display_account_key_and_ask_device_name(
        &self,
        account_key: &AccountKey,
    ) -> Result<String, PromptError> {
        if self.cancel_setup.load(Ordering::SeqCst) {
            return Err(PromptError::Cancelled);
        }
        self.displayed.lock().push(account_key.as_str().to_string());
        Ok(self.device_name.clone())
    }

    async fn invalid_account_key(&self) {
        self.invalid_notices.fetch_add(1, Ordering::SeqCst);
    }
}
