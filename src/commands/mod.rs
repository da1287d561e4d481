//! CLI subcommand implementations for punchdown.
//!
//! Everything except `serve` lives here; none of it touches the relay.
//!
//! - [`identity`] - Create the device identity, report status
//! - [`pair`] - Show the pairing code, record a paired peer
//!
//! # Usage
//!
//! ```ignore
//! use punchdown::commands;
//!
//! let store = ConfigStore::from_env()?;
//! commands::init(&store, None)?;
//! commands::pair(&store)?;
//! ```

pub mod identity;
pub mod pair;

#[doc(inline)]
pub use identity::{ensure_identity, init, status, status_report};
#[doc(inline)]
pub use pair::{add_peer, pair, pairing_screen, PeerKeys};
