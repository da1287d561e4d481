//! WebSocket transport to the relay.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves that implement the relay transport traits.
//! Nothing else in the crate touches `tokio-tungstenite` directly.

// Rust guideline compliant 2025-01

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::error::RelayError;
use crate::relay::transport::{Connector, FrameSink, FrameSource};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

fn transport_err(context: &str, e: impl std::fmt::Display) -> RelayError {
    RelayError::Transport(format!("{context}: {e}"))
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), RelayError> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .map_err(|e| transport_err("WebSocket send_text failed", e))
    }

    async fn send_pong(&mut self, data: Vec<u8>) -> Result<(), RelayError> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .map_err(|e| transport_err("WebSocket send_pong failed", e))
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        // The peer may already be gone; a failed close frame is not fatal.
        let _ = self.sink.send(tungstenite::Message::Close(None)).await;
        self.sink
            .close()
            .await
            .map_err(|e| transport_err("WebSocket close failed", e))
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsReader {
    /// Raw `Frame` variants are skipped internally.
    async fn recv(&mut self) -> Option<Result<WsMessage, RelayError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(transport_err("WebSocket read error", e))),
            };
            let mapped = match message {
                tungstenite::Message::Text(text) => WsMessage::Text(text.to_string()),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data.to_vec()),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data.to_vec()),
                tungstenite::Message::Pong(data) => WsMessage::Pong(data.to_vec()),
                tungstenite::Message::Close(close_frame) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    WsMessage::Close { code, reason }
                }
                tungstenite::Message::Frame(_) => continue,
            };
            return Some(Ok(mapped));
        }
    }
}

/// Open a WebSocket to `url` and split it into writer/reader halves.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] if the URL is invalid or the
/// handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader), RelayError> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .map_err(|e| transport_err("invalid WebSocket URL", e))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| transport_err("WebSocket connect failed", e))?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// [`Connector`] that dials real WebSockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), RelayError> {
        let (writer, reader) = connect(url).await?;
        Ok((Box::new(writer), Box::new(reader)))
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
