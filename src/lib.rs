//! Punchdown - reach a human on a paired phone from an AI coding agent.
//!
//! The agent talks to this process over a line-delimited JSON-RPC tool-call
//! protocol on stdio. Tool calls that need a human (approval, free-form
//! input) are sealed end to end, sent through an untrusted relay to the
//! paired mobile device, and block until the answer comes back, the deadline
//! passes, or the agent cancels.
//!
//! # Architecture
//!
//! - **Session** - Per-process context: identity, active peer, relay link
//! - **Relay** - Connection manager, envelope protocol, request correlation
//! - **Crypto** - Per-message authenticated box over long-term X25519 keys
//! - **Tools** - The four agent-facing tools
//! - **MCP** - The stdio JSON-RPC server in front of the tools
//!
//! # Modules
//!
//! - [`relay`] - Relay session, envelopes, pending requests, router
//! - [`crypto`] - Encryption engine
//! - [`config`] - Identity store and runtime settings
//! - [`device`] - Device identity and paired peers
//! - [`auth`] - Relay authentication tokens
//! - [`tools`] - Tool catalog and handlers
//! - [`mcp`] - Stdio server
//! - [`pairing`] - Pairing payload and QR rendering
//! - [`commands`] - CLI subcommands

// Library modules
pub mod auth;
pub mod commands;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod device;
pub mod error;
pub mod mcp;
pub mod pairing;
pub mod relay;
pub mod session;
pub mod tools;
pub mod ws;

// Re-export commonly used types
pub use config::{ConfigStore, PunchdownConfig, Settings};
pub use device::{DeviceIdentity, PairedDevice};
pub use error::RelayError;
pub use session::{Link, Session};
