//! Per-message authenticated public-key encryption ("box").
//!
//! Each device holds a long-term X25519 keypair. A message from A to B is
//! sealed with a key derived from `X25519(sk_A, pk_B)` and opened with the
//! same key derived from `X25519(sk_B, pk_A)`. There is no session state:
//! every message stands alone, so the relay (holding no secret keys) can
//! forward but never read or forge content.
//!
//! # Construction
//!
//! NaCl `crypto_box`, so the phone's tweetnacl/libsodium box opens what we
//! seal and the other way round:
//!
//! ```text
//! shared = X25519(own_secret, peer_public)
//! key    = HSalsa20(shared, 0)
//! ct     = XSalsa20-Poly1305(key, nonce = 24 random bytes, plaintext)
//! ```
//!
//! The key is the same in both directions. Direction is carried by the
//! envelope's `from`/`to` and message type, not by the box.
//!
//! # Wire Format
//!
//! ```json
//! { "ciphertext": "<base64>", "nonce": "<base64>" }
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use crypto_box::aead::{Aead, Nonce};
use crypto_box::SalsaBox;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::RelayError;

/// Nonce size for XSalsa20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// X25519 key size in bytes (public and secret).
pub const KEY_SIZE: usize = 32;

/// Ciphertext and the nonce it was sealed under, always carried together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64-encoded ciphertext (includes the 16-byte Poly1305 tag).
    pub ciphertext: String,
    /// Base64-encoded nonce (24 bytes).
    pub nonce: String,
}

/// Long-term X25519 keypair used for message confidentiality.
///
/// Distinct from the Ed25519 signing key, which only authenticates the
/// device to the relay.
#[derive(Clone)]
pub struct EncryptionKeypair {
    /// Public half, shared with paired devices.
    pub public: PublicKey,
    secret: StaticSecret,
}

impl std::fmt::Debug for EncryptionKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKeypair")
            .field("public", &BASE64.encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

impl EncryptionKeypair {
    /// Rebuild a keypair from its secret half.
    pub fn from_secret_bytes(secret: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { public, secret }
    }

    /// Rebuild a keypair from a base64 secret key.
    pub fn from_secret_base64(encoded: &str) -> Result<Self, RelayError> {
        let bytes = Zeroizing::new(decode_key(encoded, "encryption secret key")?);
        Ok(Self::from_secret_bytes(*bytes))
    }

    /// Secret half, for sealing and opening.
    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Base64 public key.
    pub fn public_base64(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }

    /// Base64 secret key, for the identity store only.
    pub fn secret_base64(&self) -> String {
        let bytes = Zeroizing::new(self.secret.to_bytes());
        BASE64.encode(bytes.as_slice())
    }
}

/// Generate a fresh X25519 keypair for confidentiality.
pub fn generate_keypair() -> EncryptionKeypair {
    let mut secret = Zeroizing::new([0u8; KEY_SIZE]);
    rand::rng().fill_bytes(secret.as_mut_slice());
    EncryptionKeypair::from_secret_bytes(*secret)
}

/// Parse a base64 X25519 public key.
pub fn public_key_from_base64(encoded: &str) -> Result<PublicKey, RelayError> {
    decode_key(encoded, "encryption public key").map(PublicKey::from)
}

fn decode_key(encoded: &str, what: &str) -> Result<[u8; KEY_SIZE], RelayError> {
    let bytes = Zeroizing::new(
        BASE64
            .decode(encoded.trim())
            .map_err(|e| RelayError::InvalidKey(format!("{what}: {e}")))?,
    );
    bytes
        .as_slice()
        .try_into()
        .map_err(|_e| RelayError::InvalidKey(format!("{what}: expected {KEY_SIZE} bytes, got {}", bytes.len())))
}

/// Precompute the box for a device pair.
///
/// Returns `None` when the peer key is a low-order point (all-zero shared
/// secret), which would make the box key predictable.
fn pair_box(own_secret: &StaticSecret, peer_public: &PublicKey) -> Option<SalsaBox> {
    if !own_secret.diffie_hellman(peer_public).was_contributory() {
        return None;
    }
    let secret = crypto_box::SecretKey::from(*Zeroizing::new(own_secret.to_bytes()));
    let public = crypto_box::PublicKey::from(*peer_public.as_bytes());
    Some(SalsaBox::new(&public, &secret))
}

fn seal_with_nonce(
    plaintext: &[u8],
    recipient_public: &PublicKey,
    sender_secret: &StaticSecret,
    nonce: &[u8; NONCE_SIZE],
) -> Result<Vec<u8>, RelayError> {
    let sealer = pair_box(sender_secret, recipient_public)
        .ok_or_else(|| RelayError::InvalidKey("recipient public key is a low-order point".to_string()))?;
    sealer
        .encrypt(Nonce::<SalsaBox>::from_slice(nonce), plaintext)
        .map_err(|e| RelayError::InvalidKey(format!("seal failed: {e}")))
}

/// Seal `plaintext` for `recipient_public`, authenticated as the owner of
/// `sender_secret`.
///
/// A fresh random nonce is drawn on every call, so sealing the same
/// plaintext twice yields different ciphertext and nonce.
pub fn encrypt(
    plaintext: &[u8],
    recipient_public: &PublicKey,
    sender_secret: &StaticSecret,
) -> Result<EncryptedPayload, RelayError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    let ciphertext = seal_with_nonce(plaintext, recipient_public, sender_secret, &nonce)?;

    Ok(EncryptedPayload {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce),
    })
}

/// Open a payload sealed by `sender_public` for the owner of
/// `recipient_secret`.
///
/// Authenticates before returning any bytes. Every failure (wrong keys,
/// tampered ciphertext or nonce, bad encoding) collapses into
/// [`RelayError::DecryptionFailed`].
pub fn decrypt(
    payload: &EncryptedPayload,
    sender_public: &PublicKey,
    recipient_secret: &StaticSecret,
) -> Result<Vec<u8>, RelayError> {
    let nonce = BASE64
        .decode(&payload.nonce)
        .map_err(|_e| RelayError::DecryptionFailed)?;
    if nonce.len() != NONCE_SIZE {
        return Err(RelayError::DecryptionFailed);
    }
    let ciphertext = BASE64
        .decode(&payload.ciphertext)
        .map_err(|_e| RelayError::DecryptionFailed)?;

    let opener = pair_box(recipient_secret, sender_public).ok_or(RelayError::DecryptionFailed)?;
    opener
        .decrypt(Nonce::<SalsaBox>::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_e| RelayError::DecryptionFailed)
}
