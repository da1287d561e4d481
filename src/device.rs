//! Device identity and paired peers.
//!
//! This module handles:
//! - Generating the local identity (device id, Ed25519 signing key, X25519
//!   encryption keypair)
//! - Converting identity and paired peers to and from the persisted config
//! - Fingerprints for visual verification
//!
//! The signing key only authenticates this device to the relay. Message
//! confidentiality uses the separate encryption keypair (see
//! [`crate::crypto`]).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use x25519_dalek::PublicKey;
use zeroize::{Zeroize, Zeroizing};

use crate::config::{PunchdownConfig, StoredKeypair, StoredPairedDevice};
use crate::crypto::{self, EncryptionKeypair};
use crate::error::RelayError;

/// Local device identity.
pub struct DeviceIdentity {
    /// Device id (UUIDv4 string).
    pub device_id: String,
    /// Ed25519 key for relay auth tokens.
    pub signing_key: SigningKey,
    /// X25519 keypair for message encryption.
    pub encryption: EncryptionKeypair,
    /// Relay base URL recorded with the identity.
    pub relay_url: Option<String>,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("fingerprint", &self.fingerprint())
            .field("relay_url", &self.relay_url)
            .finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    /// Create a fresh identity.
    pub fn generate(relay_url: Option<String>) -> Self {
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        rand::rng().fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();

        Self {
            device_id: Uuid::new_v4().to_string(),
            signing_key,
            encryption: crypto::generate_keypair(),
            relay_url,
        }
    }

    /// Rebuild the identity from the persisted config.
    ///
    /// Returns `Ok(None)` when the config has no identity yet, and
    /// [`RelayError::InvalidKey`] when key material is present but corrupt.
    pub fn from_config(config: &PunchdownConfig) -> Result<Option<Self>, RelayError> {
        let (Some(device_id), Some(keypair), Some(encryption)) = (
            config.device_id.as_ref(),
            config.keypair.as_ref(),
            config.encryption_keypair.as_ref(),
        ) else {
            return Ok(None);
        };

        let signing_key = signing_key_from_base64(&keypair.secret_key)?;
        if BASE64.encode(signing_key.verifying_key().as_bytes()) != keypair.public_key.trim() {
            return Err(RelayError::InvalidKey(
                "signing public key does not match secret key".into(),
            ));
        }

        let encryption_keypair = EncryptionKeypair::from_secret_base64(&encryption.secret_key)?;
        if encryption_keypair.public_base64() != encryption.public_key.trim() {
            return Err(RelayError::InvalidKey(
                "encryption public key does not match secret key".into(),
            ));
        }

        Ok(Some(Self {
            device_id: device_id.clone(),
            signing_key,
            encryption: encryption_keypair,
            relay_url: config.relay_url.clone(),
        }))
    }

    /// Write identity fields into `config`, leaving paired devices alone.
    ///
    /// The signing secret is stored as the 64-byte seed‖public form.
    pub fn write_to_config(&self, config: &mut PunchdownConfig) {
        let keypair_bytes = Zeroizing::new(self.signing_key.to_keypair_bytes());
        config.device_id = Some(self.device_id.clone());
        config.keypair = Some(StoredKeypair {
            public_key: self.signing_public_base64(),
            secret_key: BASE64.encode(keypair_bytes.as_slice()),
        });
        config.encryption_keypair = Some(StoredKeypair {
            public_key: self.encryption.public_base64(),
            secret_key: self.encryption.secret_base64(),
        });
        if self.relay_url.is_some() {
            config.relay_url.clone_from(&self.relay_url);
        }
    }

    /// Ed25519 public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Ed25519 public key as base64.
    pub fn signing_public_base64(&self) -> String {
        BASE64.encode(self.verifying_key().as_bytes())
    }

    /// Fingerprint of the signing identity.
    pub fn fingerprint(&self) -> String {
        compute_fingerprint(&self.verifying_key())
    }
}

/// First 8 bytes of SHA-256(verifying key), colon-separated hex.
pub fn compute_fingerprint(verifying_key: &VerifyingKey) -> String {
    let hash = Sha256::digest(verifying_key.as_bytes());
    hash[..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse an Ed25519 secret key: a 32-byte seed, or 64 bytes of
/// seed‖public key.
pub fn signing_key_from_base64(encoded: &str) -> Result<SigningKey, RelayError> {
    let bytes = Zeroizing::new(
        BASE64
            .decode(encoded.trim())
            .map_err(|e| RelayError::InvalidKey(format!("signing secret key: {e}")))?,
    );
    match bytes.len() {
        SECRET_KEY_LENGTH => {
            let mut seed = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
            seed.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&seed))
        }
        n if n == SECRET_KEY_LENGTH + PUBLIC_KEY_LENGTH => {
            let mut pair = Zeroizing::new([0u8; SECRET_KEY_LENGTH + PUBLIC_KEY_LENGTH]);
            pair.copy_from_slice(&bytes);
            SigningKey::from_keypair_bytes(&pair)
                .map_err(|e| RelayError::InvalidKey(format!("signing secret key: {e}")))
        }
        n => Err(RelayError::InvalidKey(format!(
            "signing secret key: expected 32 or 64 bytes, got {n}"
        ))),
    }
}

/// Parse an Ed25519 public key.
pub fn verifying_key_from_base64(encoded: &str) -> Result<VerifyingKey, RelayError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| RelayError::InvalidKey(format!("signing public key: {e}")))?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        RelayError::InvalidKey(format!("signing public key: expected 32 bytes, got {}", bytes.len()))
    })?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| RelayError::InvalidKey(format!("signing public key: {e}")))
}

/// A peer whose keys have been exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    /// Peer device id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Peer's Ed25519 public key.
    pub signing_public_key: VerifyingKey,
    /// Peer's X25519 public key.
    pub encryption_public_key: PublicKey,
    /// RFC 3339 pairing time.
    pub paired_at: String,
}

impl PairedDevice {
    /// Parse a persisted entry.
    pub fn from_stored(stored: &StoredPairedDevice) -> Result<Self, RelayError> {
        Ok(Self {
            id: stored.id.clone(),
            name: stored.name.clone(),
            signing_public_key: verifying_key_from_base64(&stored.public_key)?,
            encryption_public_key: crypto::public_key_from_base64(&stored.encryption_public_key)?,
            paired_at: stored.paired_at.clone(),
        })
    }

    /// Persisted form.
    pub fn to_stored(&self) -> StoredPairedDevice {
        StoredPairedDevice {
            id: self.id.clone(),
            name: self.name.clone(),
            public_key: BASE64.encode(self.signing_public_key.as_bytes()),
            encryption_public_key: BASE64.encode(self.encryption_public_key.as_bytes()),
            paired_at: self.paired_at.clone(),
        }
    }
}

/// The peer this process talks to: the first recorded paired device.
pub fn active_peer(config: &PunchdownConfig) -> Result<Option<PairedDevice>, RelayError> {
    if config.paired_devices.len() > 1 {
        log::debug!(
            "{} paired devices recorded; addressing only the first",
            config.paired_devices.len()
        );
    }
    config.paired_devices.first().map(PairedDevice::from_stored).transpose()
}
