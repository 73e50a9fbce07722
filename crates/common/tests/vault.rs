//! Integration tests for vault creation and metadata access

mod common;

use ::common::error::{AccessError, Error};
use ::common::testkit::MemoryHub;
use ::common::vault::{
    compute_root_directory_id, compute_root_directory_id_hash, decrypt_owner_access_token,
    AutomaticAccessGrantConfig,
};
use common::{logged_in, storage};

#[tokio::test]
async fn test_create_vault_and_read_metadata() {
    let hub = MemoryHub::new();
    let (alice, keys) = logged_in(&hub, "alice").await;

    let (vault, vault_keys) = alice
        .session
        .vaults()
        .create_vault(
            "Team",
            "shared documents",
            storage(),
            AutomaticAccessGrantConfig::enabled_with_depth(1),
            &keys,
        )
        .await
        .unwrap();

    let metadata = alice
        .session
        .vaults()
        .fetch_and_decrypt_metadata(vault.id, &keys)
        .await
        .unwrap();
    assert_eq!(metadata.seeds, vault_keys.seeds);
    assert_eq!(metadata.storage, storage());
    assert_eq!(metadata.automatic_access_grant.max_depth(), Some(1));

    let root_dir_id = compute_root_directory_id(&metadata.seeds);
    assert_eq!(
        vault.root_dir_hash.as_deref(),
        Some(compute_root_directory_id_hash(&root_dir_id, &metadata.seeds).as_str())
    );
}

#[tokio::test]
async fn test_owner_token_carries_recovery_key() {
    let hub = MemoryHub::new();
    let (alice, keys) = logged_in(&hub, "alice").await;
    let (vault, vault_keys) = alice
        .session
        .vaults()
        .create_vault(
            "Team",
            "",
            storage(),
            AutomaticAccessGrantConfig::default(),
            &keys,
        )
        .await
        .unwrap();

    let token = hub.access_token(vault.id, "alice").unwrap();
    let (member_key, recovery_key) = decrypt_owner_access_token(&token, &keys).unwrap();
    assert_eq!(member_key, vault_keys.member_key);
    assert_eq!(recovery_key, Some(vault_keys.recovery_key));
}

#[tokio::test]
async fn test_non_member_gets_not_member() {
    let hub = MemoryHub::new();
    let (alice, alice_keys) = logged_in(&hub, "alice").await;
    let (bob, bob_keys) = logged_in(&hub, "bob").await;
    let (vault, _) = alice
        .session
        .vaults()
        .create_vault(
            "Team",
            "",
            storage(),
            AutomaticAccessGrantConfig::default(),
            &alice_keys,
        )
        .await
        .unwrap();

    let err = bob
        .session
        .vaults()
        .fetch_and_decrypt_metadata(vault.id, &bob_keys)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Access(AccessError::NotMember(id)) if id == vault.id));

    // a role without a token is still not membership
    hub.add_member(vault.id, "bob");
    let err = bob
        .session
        .vaults()
        .fetch_and_decrypt_metadata(vault.id, &bob_keys)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Access(AccessError::NotMember(_))));
}

#[tokio::test]
async fn test_update_automatic_access_grant_keeps_seeds() {
    let hub = MemoryHub::new();
    let (alice, keys) = logged_in(&hub, "alice").await;
    let (vault, vault_keys) = alice
        .session
        .vaults()
        .create_vault(
            "Team",
            "",
            storage(),
            AutomaticAccessGrantConfig::default(),
            &keys,
        )
        .await
        .unwrap();

    let updated = alice
        .session
        .vaults()
        .update_automatic_access_grant(
            vault.id,
            AutomaticAccessGrantConfig::enabled_with_depth(3),
            &keys,
        )
        .await
        .unwrap();
    assert_eq!(updated.seeds, vault_keys.seeds);

    let metadata = alice
        .session
        .vaults()
        .fetch_and_decrypt_metadata(vault.id, &keys)
        .await
        .unwrap();
    assert_eq!(metadata.automatic_access_grant.max_depth(), Some(3));
}
