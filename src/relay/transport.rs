//! Transport seam for the relay session.
//!
//! The connection manager only ever talks to these traits. Production code
//! plugs in [`crate::ws::WsConnector`]; tests plug in
//! `relay::memory::MemoryConnector` (behind the `test-util` feature).

use async_trait::async_trait;

use crate::error::RelayError;
use crate::ws::WsMessage;

/// Write half of an open relay transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one UTF-8 text frame.
    async fn send_text(&mut self, text: &str) -> Result<(), RelayError>;

    /// Answer a transport-level ping.
    async fn send_pong(&mut self, data: Vec<u8>) -> Result<(), RelayError>;

    /// Send a close frame and flush.
    async fn close(&mut self) -> Result<(), RelayError>;
}

/// Read half of an open relay transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<WsMessage, RelayError>>;
}

/// Opens transports to the relay.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new transport to `url`.
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), RelayError>;
}
