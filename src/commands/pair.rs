//! Pairing commands: `pair` and `add-peer`.

use anyhow::{Context, Result};

use crate::config::{ConfigStore, PunchdownConfig, StoredPairedDevice};
use crate::device::{DeviceIdentity, PairedDevice};
use crate::pairing::{add_paired_device, create_pairing_payload, render_qr_lines};

/// Public keys of a peer, as shown by its pairing screen.
#[derive(Debug, Clone)]
pub struct PeerKeys {
    /// Peer device id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Ed25519 public key, base64.
    pub public_key: String,
    /// X25519 public key, base64.
    pub encryption_public_key: String,
}

/// Text shown by `punchdown pair`: QR code, then the payload JSON for
/// manual entry.
pub fn pairing_screen(config: &PunchdownConfig) -> Result<String> {
    let identity = DeviceIdentity::from_config(config)
        .context("Stored identity is corrupt")?
        .context("No device identity; run `punchdown init` first")?;
    let payload = create_pairing_payload(&identity, config.relay_url.clone());
    let json = serde_json::to_string(&payload)?;

    let mut screen = String::new();
    match render_qr_lines(&json) {
        Some(lines) => {
            for line in lines {
                screen.push_str(&line);
                screen.push('\n');
            }
        }
        None => screen.push_str("(pairing data too long for a QR code)\n"),
    }
    screen.push_str(&format!("\nScan with the Punchdown app, or enter manually:\n{json}\n"));
    screen.push_str(&format!("Fingerprint: {}\n", identity.fingerprint()));
    Ok(screen)
}

/// `punchdown pair`.
pub fn pair(store: &ConfigStore) -> Result<()> {
    print!("{}", pairing_screen(&store.load())?);
    Ok(())
}

/// `punchdown add-peer`: validate the keys and record the peer.
pub fn add_peer(store: &ConfigStore, keys: PeerKeys) -> Result<PairedDevice> {
    let mut config = store.load();
    let device = PairedDevice::from_stored(&StoredPairedDevice {
        id: keys.id,
        name: keys.name,
        public_key: keys.public_key,
        encryption_public_key: keys.encryption_public_key,
        paired_at: chrono::Utc::now().to_rfc3339(),
    })
    .context("Invalid peer keys")?;

    add_paired_device(&mut config, &device);
    store.save(&config)?;
    println!("Paired with {} ({})", device.name, device.id);
    Ok(device)
}
