//! Access tokens: a vault's member key, ECDH-ES wrapped for one user
//!
//! Owners additionally receive the recovery key in their own token.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::keys::{MemberKey, RecoveryKey};
use crate::crypto::{jwe, EcdhPublicKey, Secret, UserKeyPair};
use crate::error::SecurityFailure;

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct AccessTokenPayload {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recovery_key: Option<String>,
}

pub fn issue_access_token(
    member_key: &MemberKey,
    recipient: &EcdhPublicKey,
    recovery_key: Option<&RecoveryKey>,
) -> Result<String, SecurityFailure> {
    let payload = AccessTokenPayload {
        key: member_key.secret().to_base64(),
        recovery_key: recovery_key.map(|k| k.secret().to_base64()),
    };
    let json = Zeroizing::new(
        serde_json::to_vec(&payload)
            .map_err(|e| SecurityFailure::Crypto(format!("encode access token: {e}")))?,
    );
    jwe::ecdh_wrap(&json, recipient)
}

fn open(token: &str, own: &UserKeyPair) -> Result<AccessTokenPayload, SecurityFailure> {
    let json = jwe::ecdh_unwrap(token, own.ecdh())?;
    serde_json::from_slice(&json)
        .map_err(|e| SecurityFailure::Malformed(format!("access token payload: {e}")))
}

pub fn decrypt_access_token(token: &str, own: &UserKeyPair) -> Result<MemberKey, SecurityFailure> {
    let payload = open(token, own)?;
    Ok(Secret::from_base64(&payload.key)?.into())
}

/// Like [`decrypt_access_token`], also returning the recovery key if the
/// token carries one
pub fn decrypt_owner_access_token(
    token: &str,
    own: &UserKeyPair,
) -> Result<(MemberKey, Option<RecoveryKey>), SecurityFailure> {
    let payload = open(token, own)?;
    let member_key = Secret::from_base64(&payload.key)?.into();
    let recovery_key = payload
        .recovery_key
        .as_deref()
        .map(Secret::from_base64)
        .transpose()?
        .map(RecoveryKey::from);
    Ok((member_key, recovery_key))
}
