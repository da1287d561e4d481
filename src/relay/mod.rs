//! Relay communication layer.
//!
//! Everything that talks to the untrusted relay lives here: the envelope
//! protocol, the connection manager that keeps one session alive, the
//! pending request store that turns async replies into blocking calls, and
//! the router that glues them together.
//!
//! # Architecture
//!
//! ```text
//! tool call ──► MessageRouter ──seal──► RelayConnection ──► relay ──► phone
//!                   ▲                        │
//!                   │ resolve(id)            │ inbound queue
//!             PendingRequests ◄──open── MessageRouter::run
//! ```
//!
//! # Modules
//!
//! - [`protocol`] - Envelope shape, message types, payload content types
//! - [`connection`] - Session loop with backoff and keepalive
//! - [`pending`] - Correlation store with timeout and cancellation
//! - [`router`] - Inbound response handling, outbound sealing
//! - [`transport`] - Transport traits the connection manager is written against
//! - `memory` - In-process transport for tests (`test-util` feature)

pub mod connection;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod pending;
pub mod protocol;
pub mod router;
pub mod transport;

pub use connection::{backoff_delay, ConnectionConfig, ConnectionState, EndpointFn, RelayConnection};
pub use pending::{Outcome, PendingHandle, PendingRequests, RequestKind};
pub use protocol::{create_envelope, create_plain_envelope, Envelope, MessageType};
pub use router::MessageRouter;
pub use transport::{Connector, FrameSink, FrameSource};
