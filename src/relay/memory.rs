//! In-process relay transport.
//!
//! [`MemoryConnector`] stands in for the WebSocket dialer. Every successful
//! connect hands the far end to the paired [`MemoryRelay`] as a
//! [`MemoryPeer`], which can push frames to the client and observe what the
//! client wrote. Used by the unit and integration tests to drive the
//! connection manager without a network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::RelayError;
use crate::relay::transport::{Connector, FrameSink, FrameSource};
use crate::ws::WsMessage;

#[derive(Debug, Default)]
struct Dialer {
    refusing: bool,
    refuse_next: usize,
    stall_writes: bool,
    attempts: Vec<(Instant, String)>,
}

fn lock(dialer: &Mutex<Dialer>) -> MutexGuard<'_, Dialer> {
    dialer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client-side dialer for the in-memory relay.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    dialer: Arc<Mutex<Dialer>>,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

/// Relay side: receives one [`MemoryPeer`] per accepted connection.
#[derive(Debug)]
pub struct MemoryRelay {
    dialer: Arc<Mutex<Dialer>>,
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Create a connected dialer/relay pair.
#[must_use]
pub fn memory_relay() -> (MemoryConnector, MemoryRelay) {
    let dialer = Arc::new(Mutex::new(Dialer::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { dialer: Arc::clone(&dialer), accepted: tx },
        MemoryRelay { dialer, accepted: rx },
    )
}

impl MemoryRelay {
    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    /// Refuse every connect until switched back.
    pub fn set_refusing(&self, refusing: bool) {
        lock(&self.dialer).refusing = refusing;
    }

    /// Refuse the next `count` connects, then accept again.
    pub fn refuse_next(&self, count: usize) {
        lock(&self.dialer).refuse_next = count;
    }

    /// While set, every client write (on any connection) hangs forever.
    pub fn stall_writes(&self, stall: bool) {
        lock(&self.dialer).stall_writes = stall;
    }

    /// Instants of every connect attempt so far, accepted or not.
    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.dialer).attempts.iter().map(|(at, _)| *at).collect()
    }

    /// URLs dialed so far, in order.
    pub fn attempt_urls(&self) -> Vec<String> {
        lock(&self.dialer).attempts.iter().map(|(_, url)| url.clone()).collect()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), RelayError> {
        {
            let mut dialer = lock(&self.dialer);
            dialer.attempts.push((Instant::now(), url.to_string()));
            if dialer.refusing {
                return Err(RelayError::Transport("connection refused".into()));
            }
            if dialer.refuse_next > 0 {
                dialer.refuse_next -= 1;
                return Err(RelayError::Transport("connection refused".into()));
            }
        }

        let (to_client, from_relay) = mpsc::unbounded_channel();
        let (to_relay, from_client) = mpsc::unbounded_channel();
        let peer = MemoryPeer { url: url.to_string(), tx: Some(to_client), rx: from_client };
        self.accepted
            .send(peer)
            .map_err(|_e| RelayError::Transport("relay is gone".into()))?;

        Ok((
            Box::new(MemorySink { tx: Some(to_relay), dialer: Arc::clone(&self.dialer) }),
            Box::new(MemorySource { rx: from_relay }),
        ))
    }
}

/// Far end of one accepted in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    tx: Option<mpsc::UnboundedSender<WsMessage>>,
    rx: mpsc::UnboundedReceiver<WsMessage>,
}

impl MemoryPeer {
    /// URL the client dialed.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a frame to the client. Returns `false` once the client is gone.
    pub fn push(&self, frame: WsMessage) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Push a text frame to the client.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(WsMessage::Text(text.into()))
    }

    /// Next frame the client wrote, or `None` once its sink is dropped.
    pub async fn next_frame(&mut self) -> Option<WsMessage> {
        self.rx.recv().await
    }

    /// Next text frame the client wrote, skipping control frames.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                WsMessage::Text(text) => return Some(text),
                WsMessage::Close { .. } => return None,
                _ => continue,
            }
        }
    }

    /// End the stream from the relay side.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<WsMessage>>,
    dialer: Arc<Mutex<Dialer>>,
}

impl MemorySink {
    async fn send(&self, frame: WsMessage) -> Result<(), RelayError> {
        let stalled = lock(&self.dialer).stall_writes;
        if stalled {
            std::future::pending::<()>().await;
        }
        let tx = self.tx.as_ref().ok_or_else(|| RelayError::Transport("sink closed".into()))?;
        tx.send(frame).map_err(|_e| RelayError::Transport("peer hung up".into()))
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: &str) -> Result<(), RelayError> {
        self.send(WsMessage::Text(text.to_string())).await
    }

    async fn send_pong(&mut self, data: Vec<u8>) -> Result<(), RelayError> {
        self.send(WsMessage::Pong(data)).await
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        let result = self.send(WsMessage::Close { code: 1000, reason: String::new() }).await;
        self.tx = None;
        result
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<WsMessage>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<WsMessage, RelayError>> {
        self.rx.recv().await.map(Ok)
    }
}
