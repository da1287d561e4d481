//! Configuration loading and persistence.
//!
//! Two layers:
//!
//! - [`PunchdownConfig`]: the persisted identity/pairing file
//!   (`config.json`), read and written through a [`ConfigStore`]
//! - [`Settings`]: runtime knobs resolved from the file plus `PUNCHDOWN_*`
//!   environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::constants::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT};

/// Base64 keypair as persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeypair {
    /// Standard base64 public key.
    pub public_key: String,
    /// Standard base64 secret key.
    pub secret_key: String,
}

impl std::fmt::Debug for StoredKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKeypair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Paired peer as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPairedDevice {
    /// Peer device id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Peer's Ed25519 public key, base64.
    pub public_key: String,
    /// Peer's X25519 public key, base64.
    pub encryption_public_key: String,
    /// RFC 3339 pairing time.
    pub paired_at: String,
}

/// Contents of `config.json`. Every field is optional so a fresh install
/// loads as the empty config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchdownConfig {
    /// This device's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Ed25519 signing keypair (relay auth only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypair: Option<StoredKeypair>,
    /// X25519 keypair for message encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_keypair: Option<StoredKeypair>,
    /// Paired peers in the order they were recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paired_devices: Vec<StoredPairedDevice>,
    /// Relay base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
}

/// Reads and writes `config.json` in one directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in `PUNCHDOWN_CONFIG_DIR`, or `~/.punchdown` by default.
    pub fn from_env() -> Result<Self> {
        let dir = match std::env::var_os("PUNCHDOWN_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".punchdown"),
        };
        Ok(Self::new(dir))
    }

    /// Path of the config file.
    pub fn path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    /// Load the config. A missing or unreadable file is the empty config.
    pub fn load(&self) -> PunchdownConfig {
        let path = self.path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return PunchdownConfig::default();
            }
            Err(e) => {
                log::warn!("Could not read {}: {e}; using empty config", path.display());
                return PunchdownConfig::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Could not parse {}: {e}; using empty config", path.display());
            PunchdownConfig::default()
        })
    }

    /// Persist the config, creating the directory if needed.
    pub fn save(&self, config: &PunchdownConfig) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path();
        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config")?;

        // Secret keys live in this file: owner read/write only.
        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set config permissions")?;

        Ok(())
    }
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Relay base URL; `None` means the relay is not configured.
    pub relay_url: Option<String>,
    /// Reconnect attempts before the session gives up.
    pub max_reconnect_attempts: u32,
    /// Deadline for `request_approval`.
    pub approval_timeout: Duration,
    /// Stale-connection window; `None` disables detection.
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_url: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            approval_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_timeout: None,
        }
    }
}

impl Settings {
    /// Settings from the persisted config plus process environment overrides.
    pub fn resolve(config: &PunchdownConfig) -> Self {
        let mut settings = Self { relay_url: config.relay_url.clone(), ..Self::default() };
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// Apply `PUNCHDOWN_*` overrides read through `lookup`. Unparseable
    /// values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("PUNCHDOWN_RELAY_URL").filter(|u| !u.trim().is_empty()) {
            self.relay_url = Some(url);
        }

        if let Some(raw) = lookup("PUNCHDOWN_MAX_RECONNECT_ATTEMPTS") {
            match raw.parse::<u32>() {
                Ok(max) => self.max_reconnect_attempts = max,
                Err(_) => log::warn!("Ignoring PUNCHDOWN_MAX_RECONNECT_ATTEMPTS={raw}"),
            }
        }

        if let Some(raw) = lookup("PUNCHDOWN_APPROVAL_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    let requested = Duration::from_secs(secs);
                    if requested > MAX_REQUEST_TIMEOUT {
                        log::warn!(
                            "PUNCHDOWN_APPROVAL_TIMEOUT_SECS={raw} exceeds {}s; clamping",
                            MAX_REQUEST_TIMEOUT.as_secs()
                        );
                    }
                    self.approval_timeout = requested.min(MAX_REQUEST_TIMEOUT);
                }
                _ => log::warn!("Ignoring PUNCHDOWN_APPROVAL_TIMEOUT_SECS={raw}"),
            }
        }

        if let Some(raw) = lookup("PUNCHDOWN_HEARTBEAT_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(0) => self.heartbeat_timeout = None,
                Ok(secs) => self.heartbeat_timeout = Some(Duration::from_secs(secs)),
                Err(_) => log::warn!("Ignoring PUNCHDOWN_HEARTBEAT_TIMEOUT_SECS={raw}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> PunchdownConfig {
        PunchdownConfig {
            device_id: Some("desk-1".into()),
            keypair: Some(StoredKeypair { public_key: "cHVi".into(), secret_key: "c2Vj".into() }),
            encryption_keypair: None,
            paired_devices: vec![StoredPairedDevice {
                id: "phone-1".into(),
                name: "Phone".into(),
                public_key: "cGs=".into(),
                encryption_public_key: "ZXBr".into(),
                paired_at: "2026-01-01T00:00:00Z".into(),
            }],
            relay_url: Some("https://relay.example.com".into()),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested"));
        assert_eq!(store.load(), PunchdownConfig::default());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{ not json").unwrap();
        assert_eq!(ConfigStore::new(dir.path()).load(), PunchdownConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("punchdown"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load(), sample());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_restricts_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save(&sample()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["deviceId"], "desk-1");
        assert_eq!(json["keypair"]["secretKey"], "c2Vj");
        assert_eq!(json["pairedDevices"][0]["encryptionPublicKey"], "ZXBr");
        assert_eq!(json["pairedDevices"][0]["pairedAt"], "2026-01-01T00:00:00Z");
        assert_eq!(json["relayUrl"], "https://relay.example.com");
        assert!(json.get("encryptionKeypair").is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", sample());
        assert!(rendered.contains("cHVi"));
        assert!(!rendered.contains("c2Vj"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_reconnect_attempts, 10);
        assert_eq!(settings.approval_timeout, Duration::from_secs(300));
        assert_eq!(settings.heartbeat_timeout, None);
        assert_eq!(settings.relay_url, None);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PUNCHDOWN_RELAY_URL", "wss://other.example.com"),
            ("PUNCHDOWN_MAX_RECONNECT_ATTEMPTS", "3"),
            ("PUNCHDOWN_APPROVAL_TIMEOUT_SECS", "60"),
            ("PUNCHDOWN_HEARTBEAT_TIMEOUT_SECS", "45"),
        ]);
        let mut settings = Settings { relay_url: Some("https://relay.example.com".into()), ..Settings::default() };
        settings.apply_env_overrides(|k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(settings.relay_url.as_deref(), Some("wss://other.example.com"));
        assert_eq!(settings.max_reconnect_attempts, 3);
        assert_eq!(settings.approval_timeout, Duration::from_secs(60));
        assert_eq!(settings.heartbeat_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PUNCHDOWN_MAX_RECONNECT_ATTEMPTS", "lots"),
            ("PUNCHDOWN_APPROVAL_TIMEOUT_SECS", "0"),
            ("PUNCHDOWN_HEARTBEAT_TIMEOUT_SECS", "-1"),
        ]);
        let mut settings = Settings::default();
        settings.apply_env_overrides(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_huge_approval_timeout_is_clamped() {
        let huge = u64::MAX.to_string();
        let mut settings = Settings::default();
        settings.apply_env_overrides(|k| (k == "PUNCHDOWN_APPROVAL_TIMEOUT_SECS").then(|| huge.clone()));
        assert_eq!(settings.approval_timeout, MAX_REQUEST_TIMEOUT);
    }
}
