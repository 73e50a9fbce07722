//! Shared test utilities for session integration tests
#![allow(dead_code)]

use std::sync::Arc;

use common::config::SessionConfig;
use common::crypto::{KdfParams, UserKeyPair};
use common::session::HubSession;
use common::testkit::{MemoryHub, MemorySecretStore, ScriptedPrompt};
use common::vault::StorageDescriptor;

pub const HUB_ID: &str = "hub.example.com";

/// Route service logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Default config with Argon2 work factors cheap enough for tests
pub fn test_config() -> SessionConfig {
    SessionConfig {
        kdf: KdfParams::insecure_for_tests(),
        ..Default::default()
    }
}

/// One user on one device
pub struct TestDevice {
    pub user_id: String,
    pub hub: MemoryHub,
    pub prompt: Arc<ScriptedPrompt>,
    pub secrets: Arc<MemorySecretStore>,
    pub session: HubSession,
}

impl TestDevice {
    /// A fresh session on this device, as after restarting the client
    pub fn restart(&self) -> HubSession {
        HubSession::new(
            HUB_ID,
            Arc::new(self.hub.clone()),
            self.prompt.clone(),
            self.secrets.clone(),
            test_config(),
        )
    }

    /// The Account Key shown during first-time setup
    pub fn account_key(&self) -> String {
        self.prompt
            .displayed_account_keys()
            .first()
            .cloned()
            .expect("no account key was displayed")
    }
}

/// Set up a device for `user_id`, registering the user on the hub if needed
pub fn device(hub: &MemoryHub, user_id: &str, device_name: &str) -> TestDevice {
    init_tracing();
    if hub.user(user_id).is_none() {
        hub.add_user(user_id, &user_id.to_uppercase());
    }
    let hub = hub.as_user(user_id);
    let prompt = Arc::new(ScriptedPrompt::new(device_name));
    let secrets = Arc::new(MemorySecretStore::new());
    let session = HubSession::new(
        HUB_ID,
        Arc::new(hub.clone()),
        prompt.clone(),
        secrets.clone(),
        test_config(),
    );
    TestDevice {
        user_id: user_id.to_string(),
        hub,
        prompt,
        secrets,
        session,
    }
}

/// A user who completed first-time setup on one device
pub async fn logged_in(hub: &MemoryHub, user_id: &str) -> (TestDevice, UserKeyPair) {
    let device = device(hub, user_id, "laptop");
    let keys = device.session.login().await.unwrap();
    (device, keys)
}

pub fn storage() -> StorageDescriptor {
    StorageDescriptor {
        provider: "s3".into(),
        default_path: "vaults/shared".into(),
        region: Some("eu-west-1".into()),
        static_credentials: None,
    }
}
