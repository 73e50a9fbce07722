mod common;

use std::sync::Arc;

use ::common::crypto::AccountKey;
use ::common::device::{device_id, DeviceKeyStore, FileSecretStore};
use ::common::error::{AccessError, Error};
use ::common::session::HubSession;
use ::common::testkit::{MemoryHub, ScriptedPrompt};
use common::{device, logged_in, test_config, HUB_ID};

#[tokio::test]
async fn test_first_login_publishes_keys_and_registers_device() {
    let hub = MemoryHub::new();
    let (alice, keys) = logged_in(&hub, "alice").await;

    let published = hub.user("alice").unwrap();
    assert_eq!(published.public_keys().unwrap(), Some(keys.public_keys()));
    assert!(published.private_keys.is_some());
    assert_eq!(published.devices.len(), 1);
    assert_eq!(published.devices[0].name, "laptop");
    assert_eq!(published.devices[0].device_type, "DESKTOP");

    assert_eq!(alice.prompt.displayed_account_keys().len(), 1);
    assert_eq!(alice.prompt.times_asked(), 0);
    assert!(!alice.secrets.is_empty());
}

#[tokio::test]
async fn test_known_device_needs_no_prompt() {
    let hub = MemoryHub::new();
    let (alice, keys) = logged_in(&hub, "alice").await;

    let again = alice.restart().login().await.unwrap();
    assert_eq!(again.public_keys(), keys.public_keys());
    assert_eq!(alice.prompt.times_asked(), 0);
    assert_eq!(alice.prompt.displayed_account_keys().len(), 1);
    assert_eq!(hub.calls().put_device, 1);
}

#[tokio::test]
async fn test_second_device_recovers_with_account_key() {
    let hub = MemoryHub::new();
    let (laptop, keys) = logged_in(&hub, "alice").await;

    let phone = device(&hub, "alice", "phone");
    phone.prompt.enter_account_key(laptop.account_key());
    let recovered = phone.session.login().await.unwrap();

    assert_eq!(recovered.public_keys(), keys.public_keys());
    assert_eq!(phone.prompt.times_asked(), 1);
    assert!(phone.prompt.displayed_account_keys().is_empty());

    let devices = hub.user("alice").unwrap().devices;
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().any(|d| d.name == "phone"));
}

#[tokio::test]
async fn test_account_key_input_is_normalized() {
    let hub = MemoryHub::new();
    let (laptop, keys) = logged_in(&hub, "alice").await;

    let phone = device(&hub, "alice", "phone");
    let sloppy = format!("  {}  ", laptop.account_key().to_lowercase());
    phone.prompt.enter_account_key(sloppy);
    let recovered = phone.session.login().await.unwrap();
    assert_eq!(recovered.public_keys(), keys.public_keys());
}

#[tokio::test]
async fn test_unregistered_device_falls_back_to_recovery() {
    let hub = MemoryHub::new();
    let (alice, keys) = logged_in(&hub, "alice").await;
    let local = DeviceKeyStore::new(alice.secrets.clone())
        .get(HUB_ID, "alice")
        .unwrap()
        .unwrap();

    // an admin removed the device on the hub
    hub.remove_devices("alice");
    alice.prompt.enter_account_key(alice.account_key());
    let recovered = alice.restart().login().await.unwrap();

    assert_eq!(recovered.public_keys(), keys.public_keys());
    assert_eq!(alice.prompt.times_asked(), 1);

    // the existing local device key is registered again, not replaced
    let devices = hub.user("alice").unwrap().devices;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, device_id(&local.public()));
}

#[tokio::test]
async fn test_wrong_account_key_is_retried() {
    let hub = MemoryHub::new();
    let (laptop, keys) = logged_in(&hub, "alice").await;

    let phone = device(&hub, "alice", "phone");
    phone
        .prompt
        .enter_account_key(AccountKey::generate().as_str().to_string());
    phone.prompt.enter_account_key(laptop.account_key());

    let recovered = phone.session.login().await.unwrap();
    assert_eq!(recovered.public_keys(), keys.public_keys());
    assert_eq!(phone.prompt.times_asked(), 2);
    assert_eq!(phone.prompt.invalid_account_key_notices(), 1);
}

#[tokio::test]
async fn test_wrong_account_key_gives_up_after_max_attempts() {
    let hub = MemoryHub::new();
    logged_in(&hub, "alice").await;

    let phone = device(&hub, "alice", "phone");
    for _ in 0..test_config().max_account_key_attempts {
        phone
            .prompt
            .enter_account_key(AccountKey::generate().as_str().to_string());
    }

    let err = phone.session.login().await.unwrap_err();
    assert!(err.is_integrity_failure(), "unexpected error: {err}");
    assert_eq!(phone.prompt.times_asked(), 3);
    assert_eq!(phone.prompt.invalid_account_key_notices(), 2);
    assert_eq!(hub.user("alice").unwrap().devices.len(), 1);
    assert!(phone.secrets.is_empty());
}

#[tokio::test]
async fn test_cancelled_recovery() {
    let hub = MemoryHub::new();
    logged_in(&hub, "alice").await;

    // nothing queued: the prompt is dismissed
    let phone = device(&hub, "alice", "phone");
    let err = phone.session.login().await.unwrap_err();
    assert!(matches!(err, Error::Access(AccessError::Cancelled)));
    assert!(phone.secrets.is_empty());
}

#[tokio::test]
async fn test_cancelled_setup_publishes_nothing() {
    let hub = MemoryHub::new();
    let alice = device(&hub, "alice", "laptop");
    alice.prompt.cancel_setup(true);

    let err = alice.session.login().await.unwrap_err();
    assert!(matches!(err, Error::Access(AccessError::Cancelled)));
    assert!(hub.user("alice").unwrap().ecdh_public_key.is_none());
    assert_eq!(hub.calls().put_device, 0);
}

#[tokio::test]
async fn test_denied_secret_store() {
    let hub = MemoryHub::new();
    let (alice, _) = logged_in(&hub, "alice").await;

    alice.secrets.deny_access(true);
    let err = alice.restart().login().await.unwrap_err();
    assert!(matches!(err, Error::Access(AccessError::SecretStore(_))));
    assert_eq!(alice.prompt.times_asked(), 0);
}

#[tokio::test]
async fn test_session_caches_user_keys() {
    let hub = MemoryHub::new();
    let (alice, _) = logged_in(&hub, "alice").await;
    let before = hub.calls().current_user;

    alice.session.login().await.unwrap();
    alice.session.login().await.unwrap();
    assert_eq!(hub.calls().current_user, before);

    alice.session.logout().await;
    alice.session.login().await.unwrap();
    assert_eq!(hub.calls().current_user, before + 1);
}

#[tokio::test]
async fn test_file_secret_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();
    hub.add_user("alice", "Alice");
    let prompt = Arc::new(ScriptedPrompt::new("workstation"));

    let session = |prompt: Arc<ScriptedPrompt>| {
        HubSession::new(
            HUB_ID,
            Arc::new(hub.as_user("alice")),
            prompt,
            Arc::new(FileSecretStore::new(dir.path())),
            test_config(),
        )
    };

    let keys = session(prompt.clone()).login().await.unwrap();
    let again = session(prompt.clone()).login().await.unwrap();
    assert_eq!(again.public_keys(), keys.public_keys());
    assert_eq!(prompt.times_asked(), 0);
    assert_eq!(prompt.displayed_account_keys().len(), 1);
}
