//! Relay authentication tokens.
//!
//! The relay authenticates a device from a token passed as a connection
//! parameter, so there is no handshake round trip:
//!
//! ```text
//! token   = base64(signature) "." base64(payloadBytes)
//! payload = {"deviceId", "deviceType", "timestamp", "nonce"}   (JSON)
//! ```
//!
//! The signature is a detached Ed25519 signature over `payloadBytes` made
//! with the device's long-term signing key. A fresh token (new timestamp and
//! nonce) is minted for every connection attempt.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RelayError;
use crate::relay::protocol::now_millis;
use crate::ws::http_to_ws_scheme;

/// Which side of the pairing a device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// The machine running the coding agent.
    Desktop,
    /// The human's phone.
    Mobile,
}

/// Signed token body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// Authenticating device.
    pub device_id: String,
    /// Side of the pairing.
    pub device_type: DeviceType,
    /// Mint time, epoch milliseconds.
    pub timestamp: i64,
    /// 16 random bytes, base64.
    pub nonce: String,
}

/// Mint a token for `device_id`.
pub fn create_auth_token(
    device_id: &str,
    device_type: DeviceType,
    signing_key: &SigningKey,
) -> Result<String, RelayError> {
    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);

    let payload = TokenPayload {
        device_id: device_id.to_string(),
        device_type,
        timestamp: now_millis(),
        nonce: BASE64.encode(nonce),
    };
    let payload_bytes = serde_json::to_vec(&payload)
        .map_err(|e| RelayError::ProtocolViolation(format!("unserializable token: {e}")))?;
    let signature = signing_key.sign(&payload_bytes);

    Ok(format!(
        "{}.{}",
        BASE64.encode(signature.to_bytes()),
        BASE64.encode(&payload_bytes)
    ))
}

/// Check a token's signature against `verifying_key` and return its body.
pub fn verify_auth_token(
    token: &str,
    verifying_key: &VerifyingKey,
) -> Result<TokenPayload, RelayError> {
    let malformed = |what: &str| RelayError::ProtocolViolation(format!("malformed token: {what}"));

    let (sig_b64, payload_b64) = token.split_once('.').ok_or_else(|| malformed("missing '.'"))?;
    let sig_bytes = BASE64.decode(sig_b64).map_err(|_e| malformed("signature encoding"))?;
    let payload_bytes = BASE64.decode(payload_b64).map_err(|_e| malformed("payload encoding"))?;
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_e| malformed("signature length"))?;

    verifying_key
        .verify(&payload_bytes, &signature)
        .map_err(|_e| RelayError::ProtocolViolation("token signature does not verify".into()))?;

    serde_json::from_slice(&payload_bytes).map_err(|e| malformed(&e.to_string()))
}

/// Relay WebSocket URL for `token`: `{relay_url}/ws/device?token=...`.
///
/// `http(s)` is rewritten to `ws(s)`; the token is URL-encoded.
pub fn relay_endpoint(relay_url: &str, token: &str) -> Result<String, RelayError> {
    let ws_url = http_to_ws_scheme(relay_url.trim());
    let mut url = Url::parse(&ws_url)
        .map_err(|e| RelayError::Transport(format!("invalid relay URL {relay_url}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(RelayError::Transport(format!(
            "unsupported relay URL scheme: {}",
            url.scheme()
        )));
    }

    url.path_segments_mut()
        .map_err(|()| RelayError::Transport(format!("relay URL cannot be a base: {relay_url}")))?
        .pop_if_empty()
        .extend(["ws", "device"]);
    url.set_query(None);
    url.query_pairs_mut().append_pair("token", token);

    Ok(url.into())
}
