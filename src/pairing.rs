//! Pairing payload and terminal QR rendering.
//!
//! The desktop shows a QR code holding its public identity; the mobile app
//! scans it, records the desktop as a peer, and its own public keys are
//! recorded here with [`add_paired_device`].

use qrcodegen::{QrCode, QrCodeEcc};
use serde::{Deserialize, Serialize};

use crate::config::PunchdownConfig;
use crate::device::{DeviceIdentity, PairedDevice};

/// Light modules around the code, per side.
const QUIET_ZONE: i32 = 2;

/// What the mobile app needs to reach and encrypt for this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingPayload {
    /// Desktop device id.
    pub device_id: String,
    /// Ed25519 public key, base64.
    pub public_key: String,
    /// X25519 public key, base64.
    pub encryption_public_key: String,
    /// Relay the desktop connects to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Host name, shown in the app's device list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// This machine's host name, when the OS reports a UTF-8 one.
pub fn local_device_name() -> Option<String> {
    hostname::get().ok()?.into_string().ok()
}

/// Build the pairing payload for `identity`.
pub fn create_pairing_payload(identity: &DeviceIdentity, relay_url: Option<String>) -> PairingPayload {
    PairingPayload {
        device_id: identity.device_id.clone(),
        public_key: identity.signing_public_base64(),
        encryption_public_key: identity.encryption.public_base64(),
        relay_url: relay_url.or_else(|| identity.relay_url.clone()),
        timestamp: chrono::Utc::now().timestamp_millis(),
        device_name: local_device_name(),
    }
}

/// Render `data` as terminal lines.
///
/// Two QR rows share one terminal row through half-block glyphs, which keeps
/// the code roughly square in a 2:1 character cell. Returns `None` when the
/// data does not fit in any QR version.
pub fn render_qr_lines(data: &str) -> Option<Vec<String>> {
    let code = match QrCode::encode_text(data, QrCodeEcc::Medium) {
        Ok(code) => code,
        Err(e) => {
            log::warn!("Pairing data too long for a QR code ({} bytes): {e:?}", data.len());
            return None;
        }
    };

    // get_module reports light outside the symbol, which draws the quiet zone.
    let total = code.size() + QUIET_ZONE * 2;
    let dark = |x: i32, y: i32| code.get_module(x - QUIET_ZONE, y - QUIET_ZONE);

    let lines = (0..total)
        .step_by(2)
        .map(|y| {
            (0..total)
                .map(|x| match (dark(x, y), dark(x, y + 1)) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                })
                .collect()
        })
        .collect();
    Some(lines)
}

/// Record `device` as paired.
///
/// A device already recorded under the same id is replaced where it stands,
/// so the first-recorded peer stays the active one.
pub fn add_paired_device(config: &mut PunchdownConfig, device: &PairedDevice) {
    let stored = device.to_stored();
    match config.paired_devices.iter_mut().find(|d| d.id == stored.id) {
        Some(existing) => {
            log::info!("Re-pairing device {} ({})", stored.name, stored.id);
            *existing = stored;
        }
        None => {
            log::info!("Paired device {} ({})", stored.name, stored.id);
            config.paired_devices.push(stored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::active_peer;

    fn peer(identity: &DeviceIdentity, name: &str) -> PairedDevice {
        PairedDevice {
            id: identity.device_id.clone(),
            name: name.to_string(),
            signing_public_key: identity.verifying_key(),
            encryption_public_key: identity.encryption.public,
            paired_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_payload_carries_public_identity() {
        let identity = DeviceIdentity::generate(Some("https://relay.example.com".into()));
        let payload = create_pairing_payload(&identity, None);
        assert_eq!(payload.device_id, identity.device_id);
        assert_eq!(payload.public_key, identity.signing_public_base64());
        assert_eq!(payload.relay_url.as_deref(), Some("https://relay.example.com"));

        let wire = serde_json::to_value(&payload).unwrap();
        assert!(wire.get("encryptionPublicKey").is_some());
        assert_eq!(wire.get("deviceName").and_then(|v| v.as_str()).map(str::to_string), local_device_name());
        assert!(wire.get("secretKey").is_none());
    }

    #[test]
    fn test_payload_relay_override() {
        let identity = DeviceIdentity::generate(Some("https://a.example.com".into()));
        let payload = create_pairing_payload(&identity, Some("https://b.example.com".into()));
        assert_eq!(payload.relay_url.as_deref(), Some("https://b.example.com"));
    }

    #[test]
    fn test_qr_lines_are_square_half_blocks() {
        let identity = DeviceIdentity::generate(None);
        let data = serde_json::to_string(&create_pairing_payload(&identity, None)).unwrap();
        let lines = render_qr_lines(&data).unwrap();

        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
        assert_eq!(lines.len(), width.div_ceil(2));
        // Quiet zone: first row is blank.
        assert!(lines[0].chars().all(|c| c == ' '));
        assert!(lines.iter().any(|l| l.contains('█')));
    }

    #[test]
    fn test_qr_rejects_oversized_data() {
        assert!(render_qr_lines(&"x".repeat(5000)).is_none());
    }

    #[test]
    fn test_add_paired_device_replaces_by_id() {
        let mut config = PunchdownConfig::default();
        let phone = DeviceIdentity::generate(None);
        let tablet = DeviceIdentity::generate(None);

        add_paired_device(&mut config, &peer(&phone, "Phone"));
        add_paired_device(&mut config, &peer(&tablet, "Tablet"));
        add_paired_device(&mut config, &peer(&phone, "Phone (new)"));

        assert_eq!(config.paired_devices.len(), 2);
        assert_eq!(config.paired_devices[0].name, "Phone (new)");
        assert_eq!(active_peer(&config).unwrap().unwrap().id, phone.device_id);
    }
}
