//! Integration tests for web-of-trust signing and chain verification

mod common;

use ::common::crypto::UserKeyPair;
use ::common::hub::TrustedUserDto;
use ::common::testkit::MemoryHub;
use ::common::wot::{self, WotService};
use common::logged_in;

#[tokio::test]
async fn test_transitive_trust_depths() {
    let hub = MemoryHub::new();
    let (alice, _) = logged_in(&hub, "alice").await;
    let (bob, _) = logged_in(&hub, "bob").await;
    logged_in(&hub, "carol").await;

    alice.session.wot().sign_user("bob").await.unwrap();
    bob.session.wot().sign_user("carol").await.unwrap();

    let levels = alice.session.wot().trust_levels().await.unwrap();
    assert_eq!(levels.get("bob"), Some(&0));
    assert_eq!(levels.get("carol"), Some(&1));
    assert_eq!(levels.len(), 2);

    assert_eq!(alice.session.wot().verify_user("bob").await.unwrap(), Some(0));
    assert_eq!(alice.session.wot().verify_user("carol").await.unwrap(), Some(1));
    assert_eq!(alice.session.wot().verify_user("dave").await.unwrap(), None);

    // trust is directional
    let levels = bob.session.wot().trust_levels().await.unwrap();
    assert_eq!(levels.get("alice"), None);
    assert_eq!(levels.get("carol"), Some(&0));
}

#[tokio::test]
async fn test_forged_chain_is_dropped() {
    let hub = MemoryHub::new();
    let (alice, alice_keys) = logged_in(&hub, "alice").await;
    let (_, bob_keys) = logged_in(&hub, "bob").await;
    let (_, dave_keys) = logged_in(&hub, "dave").await;

    alice.session.wot().sign_user("bob").await.unwrap();

    // the hub claims bob vouched for dave, but the link was signed by mallory
    let mallory = UserKeyPair::generate();
    let first = wot::sign(alice_keys.signing(), "alice", "bob", &bob_keys.public_keys()).unwrap();
    let forged = wot::sign(mallory.signing(), "bob", "dave", &dave_keys.public_keys()).unwrap();
    hub.inject_trusted_user(
        "alice",
        TrustedUserDto {
            trusted_user_id: "dave".into(),
            signature_chain: vec![first.0, forged.0],
        },
    );

    let levels = alice.session.wot().trust_levels().await.unwrap();
    assert_eq!(levels.get("bob"), Some(&0));
    assert_eq!(levels.get("dave"), None);

    let err = alice.session.wot().verify_user("dave").await.unwrap_err();
    assert!(err.is_security());
}

#[tokio::test]
async fn test_corrupt_entry_does_not_hide_valid_chain() {
    let hub = MemoryHub::new();
    let (alice, _) = logged_in(&hub, "alice").await;
    logged_in(&hub, "bob").await;

    alice.session.wot().sign_user("bob").await.unwrap();
    hub.inject_trusted_user(
        "alice",
        TrustedUserDto {
            trusted_user_id: "bob".into(),
            signature_chain: vec!["not.a.signature".into()],
        },
    );

    let levels = alice.session.wot().trust_levels().await.unwrap();
    assert_eq!(levels.get("bob"), Some(&0));
}

#[tokio::test]
async fn test_replaced_keys_break_trust() {
    let hub = MemoryHub::new();
    let (alice, _) = logged_in(&hub, "alice").await;
    logged_in(&hub, "bob").await;
    alice.session.wot().sign_user("bob").await.unwrap();

    // the hub now serves different keys for bob than the ones alice signed
    hub.publish_public_keys("bob", &UserKeyPair::generate().public_keys());

    let fresh = alice.restart();
    let levels = fresh.wot().trust_levels().await.unwrap();
    assert_eq!(levels.get("bob"), None);
}

#[tokio::test]
async fn test_signing_unknown_or_keyless_user() {
    let hub = MemoryHub::new();
    let (alice, _) = logged_in(&hub, "alice").await;
    hub.add_user("erin", "Erin");

    assert!(alice.session.wot().sign_user("erin").await.unwrap_err().is_access());
    assert!(alice.session.wot().sign_user("nobody").await.unwrap_err().is_access());
}

#[tokio::test]
async fn test_trust_levels_are_cached_until_signing() {
    let hub = MemoryHub::new();
    let (alice, _) = logged_in(&hub, "alice").await;
    logged_in(&hub, "bob").await;
    let wot = alice.session.wot();

    wot.trust_levels().await.unwrap();
    wot.trust_levels().await.unwrap();
    assert_eq!(hub.calls().list_trusted_users, 1);

    wot.sign_user("bob").await.unwrap();
    let levels = wot.trust_levels().await.unwrap();
    assert_eq!(levels.get("bob"), Some(&0));
    assert_eq!(hub.calls().list_trusted_users, 2);

    alice.session.logout().await;
    wot.trust_levels().await.unwrap();
    assert_eq!(hub.calls().list_trusted_users, 3);
}
