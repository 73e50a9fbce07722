//! Compact JWS with EdDSA (RFC 8037)
//!
//! `header.payload.signature`, each base64url without padding. The signing
//! input is `header || '.' || payload` as transmitted, so the protected header
//! (which carries issuer and subject for trust signatures) is covered by the
//! signature.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::keys::{SigningPublicKey, SigningSecretKey};
use crate::error::SecurityFailure;

pub const ALG_EDDSA: &str = "EdDSA";

/// Protected header of a signed token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl JwsHeader {
    pub fn new(iss: impl Into<String>, sub: impl Into<String>, iat: i64) -> Self {
        Self {
            alg: ALG_EDDSA.to_string(),
            iss: Some(iss.into()),
            sub: Some(sub.into()),
            iat: Some(iat),
        }
    }
}

/// A parsed JWS whose signature has not been checked yet
#[derive(Debug, Clone)]
pub struct UnverifiedJws {
    pub header: JwsHeader,
    pub payload: Vec<u8>,
    signing_input: String,
    signature: ed25519_dalek::Signature,
}

impl UnverifiedJws {
    pub fn parse(token: &str) -> Result<Self, SecurityFailure> {
        let token = token.trim();
        let parts: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = parts[..] else {
            return Err(SecurityFailure::Malformed(format!(
                "expected 3 JWS segments, got {}",
                parts.len()
            )));
        };

        let header: JwsHeader = serde_json::from_slice(&decode("header", header_b64)?)
            .map_err(|e| SecurityFailure::Malformed(format!("jws header: {e}")))?;
        if header.alg != ALG_EDDSA {
            return Err(SecurityFailure::UnsupportedAlgorithm(header.alg));
        }

        let payload = decode("payload", payload_b64)?;
        let signature = ed25519_dalek::Signature::from_slice(&decode("signature", signature_b64)?)
            .map_err(|_| SecurityFailure::Malformed("jws signature has wrong size".into()))?;

        Ok(Self {
            header,
            payload,
            signing_input: format!("{header_b64}.{payload_b64}"),
            signature,
        })
    }

    /// Check the signature; returns the signed header and payload
    pub fn verify(self, key: &SigningPublicKey) -> Result<(JwsHeader, Vec<u8>), SecurityFailure> {
        key.verify(self.signing_input.as_bytes(), &self.signature)
            .map_err(|_| SecurityFailure::InvalidSignature(0))?;
        Ok((self.header, self.payload))
    }
}

fn decode(what: &str, segment: &str) -> Result<Vec<u8>, SecurityFailure> {
    B64URL
        .decode(segment)
        .map_err(|_| SecurityFailure::Malformed(format!("jws {what}: invalid base64url")))
}

/// Produce a compact JWS over `payload`
pub fn sign(
    header: &JwsHeader,
    payload: &[u8],
    key: &SigningSecretKey,
) -> Result<String, SecurityFailure> {
    let header_json = serde_json::to_vec(header)
        .map_err(|e| SecurityFailure::Crypto(format!("jws header encode: {e}")))?;
    let signing_input = format!("{}.{}", B64URL.encode(header_json), B64URL.encode(payload));
    let signature = key.sign(signing_input.as_bytes());
    Ok(format!(
        "{}.{}",
        signing_input,
        B64URL.encode(signature.to_bytes())
    ))
}
