//! Punchdown CLI.
//!
//! This is the main binary entry point. See the `punchdown` library for the
//! core functionality.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use punchdown::commands::{self, PeerKeys};
use punchdown::ws::WsConnector;
use punchdown::{mcp, ConfigStore, Session, Settings};
use tokio::io::BufReader;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "punchdown")]
#[command(version)]
#[command(about = "Reach a human on a paired phone from an AI coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tool calls on stdio (default)
    Serve,
    /// Create this device's identity if it does not exist
    Init {
        /// Relay base URL to record
        #[arg(long)]
        relay_url: Option<String>,
    },
    /// Show the pairing QR code
    Pair,
    /// Record a paired device from its public keys
    AddPeer {
        /// Peer device id
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Ed25519 public key, base64
        #[arg(long)]
        public_key: String,
        /// X25519 public key, base64
        #[arg(long)]
        encryption_public_key: String,
    },
    /// Print identity, relay and paired devices
    Status,
}

/// Send logs to `PUNCHDOWN_LOG_FILE` when set, stderr otherwise. Stdout
/// belongs to the tool-call protocol.
fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Some(path) = std::env::var_os("PUNCHDOWN_LOG_FILE") {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.to_string_lossy()))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }
    builder.init();
    Ok(())
}

/// Connect to the relay when paired and serve tool calls until stdin closes
/// or Ctrl-C.
async fn serve(store: &ConfigStore) -> Result<()> {
    let config = store.load();
    let settings = Settings::resolve(&config);
    let session = Arc::new(Session::start(&config, settings, WsConnector)?);

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = mcp::serve(Arc::clone(&session), stdin, stdout) => {
            if let Err(e) = &result {
                log::error!("Stdio server failed: {e:#}");
            }
            session.shutdown().await;
            result
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted; shutting down");
            session.shutdown().await;
            // The runtime would otherwise wait on the blocking stdin read.
            std::process::exit(0);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let store = ConfigStore::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&store).await?,
        Commands::Init { relay_url } => commands::init(&store, relay_url)?,
        Commands::Pair => commands::pair(&store)?,
        Commands::AddPeer { id, name, public_key, encryption_public_key } => {
            commands::add_peer(&store, PeerKeys { id, name, public_key, encryption_public_key })?;
        }
        Commands::Status => commands::status(&store)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["punchdown"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_add_peer_flags() {
        let cli = Cli::try_parse_from([
            "punchdown", "add-peer", "--id", "p1", "--name", "Phone",
            "--public-key", "AAAA", "--encryption-public-key", "BBBB",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::AddPeer { ref name, .. }) if name == "Phone"));
    }
}
