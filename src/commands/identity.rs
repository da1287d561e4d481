//! Identity commands: `init` and `status`.

use std::fmt::Write as _;

use anyhow::{Context, Result};

use crate::config::{ConfigStore, PunchdownConfig, Settings};
use crate::device::{active_peer, DeviceIdentity};

/// Load the identity from `config`, or generate and record one.
///
/// A given `relay_url` is recorded either way. Returns the identity and
/// whether it was created.
pub fn ensure_identity(
    config: &mut PunchdownConfig,
    relay_url: Option<String>,
) -> Result<(DeviceIdentity, bool)> {
    if relay_url.is_some() {
        config.relay_url = relay_url;
    }

    if let Some(identity) =
        DeviceIdentity::from_config(config).context("Stored identity is corrupt")?
    {
        return Ok((identity, false));
    }

    let identity = DeviceIdentity::generate(config.relay_url.clone());
    identity.write_to_config(config);
    log::info!("Generated device identity {}", identity.device_id);
    Ok((identity, true))
}

/// `punchdown init`: create the identity if absent and persist it.
pub fn init(store: &ConfigStore, relay_url: Option<String>) -> Result<()> {
    let mut config = store.load();
    let (identity, created) = ensure_identity(&mut config, relay_url)?;
    store.save(&config)?;

    if created {
        println!("Created device identity {}", identity.device_id);
    } else {
        println!("Device identity {} already exists", identity.device_id);
    }
    println!("Fingerprint: {}", identity.fingerprint());
    match &config.relay_url {
        Some(url) => println!("Relay: {url}"),
        None => println!("Relay: not configured (use --relay-url or PUNCHDOWN_RELAY_URL)"),
    }
    println!("Config: {}", store.path().display());
    Ok(())
}

/// Human-readable status of `config` under `settings`.
pub fn status_report(config: &PunchdownConfig, settings: &Settings) -> Result<String> {
    let mut out = String::new();

    match DeviceIdentity::from_config(config).context("Stored identity is corrupt")? {
        Some(identity) => {
            writeln!(out, "Device:      {}", identity.device_id)?;
            writeln!(out, "Fingerprint: {}", identity.fingerprint())?;
        }
        None => writeln!(out, "Device:      none (run `punchdown init`)")?,
    }

    writeln!(out, "Relay:       {}", settings.relay_url.as_deref().unwrap_or("not configured"))?;

    if config.paired_devices.is_empty() {
        writeln!(out, "Paired:      none (run `punchdown pair`)")?;
    } else {
        let active = active_peer(config).context("Stored peer is corrupt")?;
        writeln!(out, "Paired:")?;
        for device in &config.paired_devices {
            let marker = match &active {
                Some(peer) if peer.id == device.id => " (active)",
                _ => "",
            };
            writeln!(out, "  {} {} paired {}{marker}", device.name, device.id, device.paired_at)?;
        }
    }

    Ok(out)
}

/// `punchdown status`.
pub fn status(store: &ConfigStore) -> Result<()> {
    let config = store.load();
    let settings = Settings::resolve(&config);
    print!("{}", status_report(&config, &settings)?);
    Ok(())
}
