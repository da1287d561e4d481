//! Message router: the glue between the relay session, the crypto layer and
//! the pending request store.
//!
//! Inbound, it opens `approval_response` / `input_response` envelopes from
//! the paired device and resolves the matching pending request. Anything it
//! cannot open, match, or read as a response of its declared type is logged
//! and dropped; the waiting call falls back on its own timeout.
//!
//! Outbound, it seals content for the paired device and hands the envelope to
//! the connection manager.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connection::RelayConnection;
use super::pending::{PendingRequests, RequestKind};
use super::protocol::{create_envelope, ApprovalResponse, Envelope, InputResponse, MessageType};
use crate::device::{DeviceIdentity, PairedDevice};
use crate::error::RelayError;

/// Routes envelopes between this device and its active peer.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    identity: Arc<DeviceIdentity>,
    peer: PairedDevice,
    connection: RelayConnection,
    pending: Arc<PendingRequests>,
}

impl MessageRouter {
    /// Router addressing `peer` over `connection`.
    pub fn new(
        identity: Arc<DeviceIdentity>,
        peer: PairedDevice,
        connection: RelayConnection,
        pending: Arc<PendingRequests>,
    ) -> Self {
        Self { identity, peer, connection, pending }
    }

    /// The peer every outbound envelope is addressed to.
    pub fn peer(&self) -> &PairedDevice {
        &self.peer
    }

    /// The relay session this router sends through.
    pub fn connection(&self) -> &RelayConnection {
        &self.connection
    }

    /// Consume the connection's inbound queue until it closes.
    pub async fn run(self, mut inbound: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = inbound.recv().await {
            self.handle_inbound(&envelope);
        }
        log::debug!("Inbound queue closed; router stopping");
    }

    /// Dispatch one inbound envelope. Returns whether it resolved a pending
    /// request.
    pub fn handle_inbound(&self, envelope: &Envelope) -> bool {
        match envelope.message_type {
            MessageType::ApprovalResponse | MessageType::InputResponse => {
                self.resolve_response(envelope)
            }
            MessageType::Error => {
                log::warn!("Peer {} reported an error for {}", envelope.from, envelope.id);
                false
            }
            other => {
                log::debug!("Ignoring inbound {} envelope {}", other, envelope.id);
                false
            }
        }
    }

    fn resolve_response(&self, envelope: &Envelope) -> bool {
        let plaintext = match envelope.open(
            &self.peer.encryption_public_key,
            self.identity.encryption.secret(),
        ) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::warn!("Dropping {} {}: {e}", envelope.message_type, envelope.id);
                return false;
            }
        };

        // The box key is shared by both directions, so one of our own
        // requests relabelled as a response would open. Its content would not
        // have the response shape.
        let shaped = match envelope.message_type {
            MessageType::ApprovalResponse => serde_json::from_slice::<ApprovalResponse>(&plaintext).is_ok(),
            _ => serde_json::from_slice::<InputResponse>(&plaintext).is_ok(),
        };
        if !shaped {
            log::warn!(
                "Dropping {} {}: content is not a {}",
                envelope.message_type,
                envelope.id,
                envelope.message_type
            );
            return false;
        }

        let content: Value = match serde_json::from_slice(&plaintext) {
            Ok(content) => content,
            Err(e) => {
                log::warn!(
                    "Dropping {} {}: payload is not JSON ({e})",
                    envelope.message_type,
                    envelope.id
                );
                return false;
            }
        };

        if self.pending.resolve(envelope.id, content) {
            true
        } else {
            log::debug!(
                "No pending request for {} {}; dropping",
                envelope.message_type,
                envelope.id
            );
            false
        }
    }

    fn seal<T: Serialize + ?Sized>(
        &self,
        message_type: MessageType,
        content: &T,
    ) -> Result<Envelope, RelayError> {
        create_envelope(
            &self.identity.device_id,
            &self.peer.id,
            message_type,
            content,
            &self.peer.encryption_public_key,
            self.identity.encryption.secret(),
        )
    }

    /// Fire-and-forget send. Returns whether the envelope was written to a
    /// live connection; failures are logged, never retried.
    pub async fn notify<T: Serialize + ?Sized + Sync>(
        &self,
        message_type: MessageType,
        content: &T,
    ) -> bool {
        let envelope = match self.seal(message_type, content) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Could not build {message_type}: {e}");
                return false;
            }
        };
        match self.connection.send(&envelope).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{message_type} {} not delivered: {e}", envelope.id);
                false
            }
        }
    }

    /// Send a request and wait for its correlated response.
    ///
    /// The waiter is registered before the send so a fast response cannot
    /// slip past. A failed send cancels the waiter and returns the send
    /// error. The deadline covers the send as well as the wait: a write
    /// still stuck when it passes ends with [`RelayError::TimedOut`].
    /// Tripping `cancel` aborts the call with [`RelayError::Cancelled`]
    /// unless the response won the race.
    pub async fn request<T: Serialize + ?Sized + Sync>(
        &self,
        message_type: MessageType,
        kind: RequestKind,
        content: &T,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, RelayError> {
        let envelope = self.seal(message_type, content)?;
        let id = envelope.id;
        let handle = self.pending.add(id, kind, timeout);

        let sent = tokio::select! {
            () = cancel.cancelled() => Err(RelayError::Cancelled),
            sent = tokio::time::timeout_at(handle.deadline(), self.connection.send(&envelope)) => {
                sent.unwrap_or(Err(RelayError::TimedOut))
            }
        };
        if let Err(e) = sent {
            self.pending.cancel(id);
            log::warn!("{message_type} {id} not sent: {e}");
            return Err(e);
        }
        log::info!("{message_type} {id} sent; waiting up to {}s", timeout.as_secs());

        let wait = handle.wait();
        tokio::pin!(wait);
        let outcome = tokio::select! {
            outcome = &mut wait => outcome,
            () = cancel.cancelled() => {
                self.pending.cancel(id);
                wait.await
            }
        };
        outcome.into_result()
    }
}
