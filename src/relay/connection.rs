//! Relay connection manager.
//!
//! Owns the single WebSocket session to the relay and keeps it alive:
//!
//! - Opens the transport with a freshly minted auth URL per attempt
//! - Answers envelope-level `ping` and transport-level Ping frames
//! - Forwards every other valid envelope to the router over a bounded queue
//! - Drops malformed frames with a warning
//! - Reconnects with exponential backoff until attempts run out
//!
//! # Architecture
//!
//! One spawned task runs the session loop. It shares three things with the
//! [`RelayConnection`] handle: a `watch` channel carrying
//! [`ConnectionState`], the current write half behind an async mutex, and a
//! cancellation token that `disconnect` trips. Writes from tool calls and
//! pong replies from the session loop go through the same mutex, so frames
//! never interleave.
//!
//! Every write is bounded by [`ConnectionConfig::write_timeout`]. A write
//! that stalls trips the current session's token, which ends the read loop
//! and sends the session down the normal reconnect path.
//!
//! Rust guideline compliant 2025-01

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{Envelope, MessageType};
use super::transport::{Connector, FrameSink, FrameSource};
use crate::constants::{
    CONNECT_TIMEOUT, DEFAULT_MAX_RECONNECT_ATTEMPTS, INBOUND_QUEUE_CAPACITY, INITIAL_BACKOFF,
    MAX_BACKOFF, WRITE_TIMEOUT,
};
use crate::error::RelayError;
use crate::ws::WsMessage;

/// Produces the URL for the next connect attempt.
///
/// Called once per attempt so each one carries a fresh auth token.
pub type EndpointFn = Arc<dyn Fn() -> Result<String, RelayError> + Send + Sync>;

/// Lifecycle of the relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no attempt in flight.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Transport open; sends are accepted.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting {
        /// 1-based reconnect attempt about to be made.
        attempt: u32,
        /// Delay before that attempt, in milliseconds.
        next_retry_ms: u64,
    },
    /// Explicitly disconnected. Terminal.
    Stopped,
}

/// Settings for one relay session.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Source of the dial URL.
    pub endpoint: EndpointFn,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Treat the session as dead after this long without any inbound frame.
    pub heartbeat_timeout: Option<Duration>,
    /// Upper bound on a single connect.
    pub connect_timeout: Duration,
    /// Upper bound on a single frame write, including the wait for the sink.
    pub write_timeout: Duration,
}

impl ConnectionConfig {
    /// Config with default limits for `endpoint`.
    pub fn new(endpoint: EndpointFn) -> Self {
        Self {
            endpoint,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_timeout: None,
            connect_timeout: CONNECT_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

/// Delay before reconnect attempt `attempt` (0-based).
///
/// `min(1s * 2^attempt, 30s)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    INITIAL_BACKOFF
        .checked_mul(factor)
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

enum Outgoing<'a> {
    Text(&'a str),
    Pong(Vec<u8>),
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    shutdown: CancellationToken,
    /// Child of `shutdown`, replaced per session. A stalled write trips it.
    session: Mutex<CancellationToken>,
    write_timeout: Duration,
    task: Mutex<Option<JoinHandle<Result<(), RelayError>>>>,
}

impl Shared {
    /// `Stopped` is terminal; nothing moves the state out of it.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Stopped || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn session(&self) -> CancellationToken {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Install a freshly opened sink and return the new session's token.
    /// Returns `None` (and closes the sink) if shutdown won the race.
    async fn install_sink(&self, mut sink: Box<dyn FrameSink>) -> Option<CancellationToken> {
        let mut slot = self.sink.lock().await;
        if self.shutdown.is_cancelled() {
            drop(slot);
            self.close_sink(sink.as_mut()).await;
            return None;
        }
        *slot = Some(sink);
        let session = self.shutdown.child_token();
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session.clone();
        Some(session)
    }

    async fn clear_sink(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            self.close_sink(sink.as_mut()).await;
        }
    }

    async fn close_sink(&self, sink: &mut dyn FrameSink) {
        match tokio::time::timeout(self.write_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("Relay close failed: {e}"),
            Err(_elapsed) => log::debug!("Relay close timed out"),
        }
    }

    /// Write one frame. Gives up with `NotConnected` on shutdown, and with a
    /// transport error (recycling the session) once `write_timeout` passes.
    async fn write(&self, frame: Outgoing<'_>) -> Result<(), RelayError> {
        let session = self.session();
        let write = async {
            let mut slot = self.sink.lock().await;
            let sink = slot.as_mut().ok_or(RelayError::NotConnected)?;
            match frame {
                Outgoing::Text(text) => sink.send_text(text).await,
                Outgoing::Pong(data) => sink.send_pong(data).await,
            }
        };

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(RelayError::NotConnected),
            written = tokio::time::timeout(self.write_timeout, write) => {
                written.unwrap_or_else(|_elapsed| {
                    log::warn!(
                        "Relay write stalled for {}s; recycling session",
                        self.write_timeout.as_secs()
                    );
                    session.cancel();
                    Err(RelayError::Transport("write timed out".into()))
                })
            }
        }
    }
}

/// Handle to the relay session. Cheap to clone.
#[derive(Clone)]
pub struct RelayConnection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("state", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

impl RelayConnection {
    /// Start the session loop and return immediately.
    ///
    /// Valid inbound envelopes other than `ping` arrive on the returned
    /// receiver. Watch [`RelayConnection::subscribe`] or call
    /// [`RelayConnection::wait_connected`] for readiness.
    pub fn connect<C: Connector>(
        config: ConnectionConfig,
        connector: C,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            state,
            sink: tokio::sync::Mutex::new(None),
            session: Mutex::new(shutdown.child_token()),
            shutdown,
            write_timeout: config.write_timeout,
            task: Mutex::new(None),
        });
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

        let task = tokio::spawn(run_session(Arc::clone(&shared), config, connector, inbound_tx));
        *shared.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        (Self { shared }, inbound_rx)
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Whether sends are currently accepted.
    pub fn is_connected(&self) -> bool {
        *self.shared.state.borrow() == ConnectionState::Connected
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until `Connected`. Returns `false` on timeout or if the session
    /// was stopped first.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.state.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Stopped)),
        )
        .await;
        match reached {
            Ok(Ok(state)) => *state == ConnectionState::Connected,
            _ => false,
        }
    }

    /// Serialize and write one envelope.
    ///
    /// Fails fast with [`RelayError::NotConnected`] unless the session is
    /// `Connected`; nothing is queued for later. A write that does not
    /// complete within the write timeout fails with a transport error.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        let text = envelope.to_json()?;
        self.shared.write(Outgoing::Text(&text)).await?;
        log::debug!("Sent {} envelope {}", envelope.message_type, envelope.id);
        Ok(())
    }

    /// Stop the session for good: no further reconnects. Idempotent.
    pub async fn disconnect(&self) {
        self.shared.shutdown.cancel();
        self.shared.clear_sink().await;
        self.shared.state.send_replace(ConnectionState::Stopped);
        if let Err(e) = self.finished().await {
            log::debug!("Relay session ended with: {e}");
        }
    }

    /// Wait for the session loop to end and return how it ended.
    ///
    /// Only the first caller observes the result; later callers get `Ok`.
    pub async fn finished(&self) -> Result<(), RelayError> {
        let task = self.shared.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        match task {
            Some(handle) => handle
                .await
                .unwrap_or_else(|e| Err(RelayError::Transport(format!("session task failed: {e}")))),
            None => Ok(()),
        }
    }
}

enum SessionEnd {
    Shutdown,
    Closed(String),
}

async fn run_session<C: Connector>(
    shared: Arc<Shared>,
    config: ConnectionConfig,
    connector: C,
    inbound: mpsc::Sender<Envelope>,
) -> Result<(), RelayError> {
    let mut attempt: u32 = 0;

    loop {
        if shared.shutdown.is_cancelled() {
            return Ok(());
        }
        shared.set_state(ConnectionState::Connecting);

        let url = match (config.endpoint)() {
            Ok(url) => url,
            Err(e) => {
                log::error!("Cannot build relay endpoint: {e}");
                shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let opened = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => return Ok(()),
            res = tokio::time::timeout(config.connect_timeout, connector.connect(&url)) => {
                res.unwrap_or_else(|_| Err(RelayError::Transport("connect timed out".into())))
            }
        };

        match opened {
            Ok((sink, source)) => {
                let Some(session) = shared.install_sink(sink).await else {
                    return Ok(());
                };
                attempt = 0;
                shared.set_state(ConnectionState::Connected);
                log::info!("Connected to relay");

                let end = read_frames(&shared, &session, source, &inbound, config.heartbeat_timeout).await;
                shared.clear_sink().await;
                match end {
                    SessionEnd::Shutdown => return Ok(()),
                    SessionEnd::Closed(reason) => {
                        log::warn!("Relay connection closed: {reason}");
                    }
                }
            }
            Err(e) => log::warn!("Failed to connect to relay: {e}"),
        }

        if shared.shutdown.is_cancelled() {
            return Ok(());
        }
        if attempt >= config.max_reconnect_attempts {
            shared.set_state(ConnectionState::Disconnected);
            let err = RelayError::ReconnectExhausted { attempts: attempt };
            log::error!("{err}; relay session abandoned");
            return Err(err);
        }

        let delay = backoff_delay(attempt);
        attempt += 1;
        shared.set_state(ConnectionState::Reconnecting {
            attempt,
            next_retry_ms: delay.as_millis() as u64,
        });
        log::info!(
            "Reconnecting to relay in {:.1}s (attempt {}/{})",
            delay.as_secs_f64(),
            attempt,
            config.max_reconnect_attempts
        );

        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

async fn next_frame(
    source: &mut dyn FrameSource,
    heartbeat: Option<Duration>,
) -> Option<Result<WsMessage, RelayError>> {
    match heartbeat {
        Some(limit) => tokio::time::timeout(limit, source.recv())
            .await
            .unwrap_or_else(|_| {
                Some(Err(RelayError::Transport(format!(
                    "no frames for {}s",
                    limit.as_secs()
                ))))
            }),
        None => source.recv().await,
    }
}

async fn read_frames(
    shared: &Shared,
    session: &CancellationToken,
    mut source: Box<dyn FrameSource>,
    inbound: &mpsc::Sender<Envelope>,
    heartbeat: Option<Duration>,
) -> SessionEnd {
    loop {
        let frame = tokio::select! {
            biased;
            () = session.cancelled() => {
                if shared.shutdown.is_cancelled() {
                    return SessionEnd::Shutdown;
                }
                return SessionEnd::Closed("write stalled".into());
            }
            frame = next_frame(source.as_mut(), heartbeat) => frame,
        };

        let text = match frame {
            None => return SessionEnd::Closed("stream ended".into()),
            Some(Err(e)) => return SessionEnd::Closed(e.to_string()),
            Some(Ok(WsMessage::Close { code, reason })) => {
                return SessionEnd::Closed(format!("close frame {code} {reason}"));
            }
            Some(Ok(WsMessage::Ping(data))) => {
                if let Err(e) = shared.write(Outgoing::Pong(data)).await {
                    log::warn!("Failed to answer transport ping: {e}");
                }
                continue;
            }
            Some(Ok(WsMessage::Pong(_))) => continue,
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    log::warn!("Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
        };

        let envelope = match Envelope::parse(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Dropping inbound frame: {e}");
                continue;
            }
        };

        if envelope.message_type == MessageType::Ping {
            let pong = envelope.pong_reply();
            let sent = match pong.to_json() {
                Ok(json) => shared.write(Outgoing::Text(&json)).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                log::warn!("Failed to answer ping {}: {e}", envelope.id);
            }
            continue;
        }

        log::debug!("Received {} envelope {}", envelope.message_type, envelope.id);
        if inbound.send(envelope).await.is_err() {
            log::debug!("Inbound queue closed; dropping envelope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::memory::{memory_relay, MemoryPeer, MemoryRelay};
    use crate::relay::protocol::create_plain_envelope;

    fn config(max_attempts: u32) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(Arc::new(|| Ok("ws://relay.test/ws/device".into())));
        config.max_reconnect_attempts = max_attempts;
        config
    }

    async fn connected(max_attempts: u32) -> (RelayConnection, mpsc::Receiver<Envelope>, MemoryRelay, MemoryPeer) {
        let (connector, mut relay) = memory_relay();
        let (conn, inbound) = RelayConnection::connect(config(max_attempts), connector);
        let peer = relay.accept().await.expect("accepted");
        assert!(conn.wait_connected(Duration::from_secs(1)).await);
        (conn, inbound, relay, peer)
    }

    #[test]
    fn test_backoff_schedule() {
        let secs: Vec<u64> = (0..8).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(backoff_delay(u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_follow_backoff_then_give_up() {
        let (connector, relay) = memory_relay();
        relay.set_refusing(true);
        let (conn, _inbound) = RelayConnection::connect(config(7), connector);

        let result = conn.finished().await;
        assert_eq!(result, Err(RelayError::ReconnectExhausted { attempts: 7 }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let times = relay.attempt_times();
        assert_eq!(times.len(), 8, "initial attempt plus seven reconnects");
        let gaps: Vec<u64> = times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_resets_attempt_counter() {
        let (connector, mut relay) = memory_relay();
        relay.refuse_next(3);
        let (conn, _inbound) = RelayConnection::connect(config(10), connector);

        let mut peer = relay.accept().await.expect("accepted after three refusals");
        assert!(conn.wait_connected(Duration::from_secs(1)).await);
        peer.hang_up();

        let _second = relay.accept().await.expect("reconnected");
        let times = relay.attempt_times();
        let gaps: Vec<u64> = times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        // 1, 2, 4 while refused, then back to 1 after the session that worked.
        assert_eq!(gaps, vec![1, 2, 4, 1]);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_inbound_envelopes_reach_router_queue() {
        let (conn, mut inbound, _relay, peer) = connected(3).await;

        let env = create_plain_envelope("mobile", "desktop", MessageType::Ack);
        assert!(peer.push_text(env.to_json().unwrap()));

        let got = inbound.recv().await.unwrap();
        assert_eq!(got, env);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (conn, mut inbound, _relay, peer) = connected(3).await;

        peer.push_text("not json");
        peer.push_text(r#"{"id":"nope","from":"a","to":"b","type":"ack","timestamp":1}"#);
        let valid = create_plain_envelope("mobile", "desktop", MessageType::Ack);
        peer.push_text(valid.to_json().unwrap());

        assert_eq!(inbound.recv().await.unwrap().id, valid.id);
        assert_eq!(conn.state(), ConnectionState::Connected);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong_and_not_forwarded() {
        let (conn, mut inbound, _relay, mut peer) = connected(3).await;

        let ping = create_plain_envelope("mobile", "desktop", MessageType::Ping);
        peer.push_text(ping.to_json().unwrap());

        let pong = Envelope::parse(&peer.next_text().await.unwrap()).unwrap();
        assert_eq!(pong.message_type, MessageType::Pong);
        assert_eq!(pong.id, ping.id);
        assert_eq!(pong.from, "desktop");
        assert_eq!(pong.to, "mobile");
        assert!(inbound.try_recv().is_err());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_transport_ping_gets_pong_frame() {
        let (conn, _inbound, _relay, mut peer) = connected(3).await;

        peer.push(WsMessage::Ping(vec![7, 7]));
        assert_eq!(peer.next_frame().await, Some(WsMessage::Pong(vec![7, 7])));
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_reaches_relay_when_connected() {
        let (conn, _inbound, _relay, mut peer) = connected(3).await;

        let env = create_plain_envelope("desktop", "mobile", MessageType::Ack);
        conn.send(&env).await.unwrap();
        let wire = peer.next_text().await.unwrap();
        assert_eq!(Envelope::parse(&wire).unwrap(), env);
        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_fails_fast() {
        let (connector, relay) = memory_relay();
        relay.set_refusing(true);
        let (conn, _inbound) = RelayConnection::connect(config(10), connector);

        assert!(!conn.wait_connected(Duration::from_millis(500)).await);
        let env = create_plain_envelope("desktop", "mobile", MessageType::Ack);
        assert_eq!(conn.send(&env).await, Err(RelayError::NotConnected));
        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_hang_up_triggers_reconnect() {
        let (conn, _inbound, mut relay, mut peer) = connected(3).await;
        let mut states = conn.subscribe();

        peer.hang_up();
        states
            .wait_for(|s| matches!(s, ConnectionState::Reconnecting { attempt: 1, next_retry_ms: 1000 }))
            .await
            .unwrap();

        let _again = relay.accept().await.expect("reconnected");
        assert!(conn.wait_connected(Duration::from_secs(1)).await);
        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out_and_recycles_session() {
        let (conn, _inbound, mut relay, _stalled) = connected(3).await;
        relay.stall_writes(true);

        let env = create_plain_envelope("desktop", "mobile", MessageType::Ack);
        let start = tokio::time::Instant::now();
        assert_eq!(conn.send(&env).await, Err(RelayError::Transport("write timed out".into())));
        assert_eq!(start.elapsed().as_secs(), WRITE_TIMEOUT.as_secs());

        relay.stall_writes(false);
        let mut fresh = relay.accept().await.expect("reconnected");
        assert!(conn.wait_connected(Duration::from_secs(60)).await);
        conn.send(&env).await.unwrap();
        assert_eq!(Envelope::parse(&fresh.next_text().await.unwrap()).unwrap(), env);
        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_does_not_block_pongs_forever() {
        let (conn, _inbound, mut relay, stalled) = connected(3).await;
        relay.stall_writes(true);

        // The pong write stalls and recycles the session.
        stalled.push(WsMessage::Ping(vec![1]));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        relay.stall_writes(false);
        let mut fresh = relay.accept().await.expect("reconnected");
        assert!(conn.wait_connected(Duration::from_secs(60)).await);

        fresh.push(WsMessage::Ping(vec![2]));
        assert_eq!(fresh.next_frame().await, Some(WsMessage::Pong(vec![2])));
        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_does_not_wait_for_stalled_write() {
        let (conn, _inbound, relay, _peer) = connected(3).await;
        relay.stall_writes(true);

        let sender = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let env = create_plain_envelope("desktop", "mobile", MessageType::Ack);
                conn.send(&env).await
            })
        };
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        relay.stall_writes(false);

        let start = tokio::time::Instant::now();
        conn.disconnect().await;
        assert!(start.elapsed() < WRITE_TIMEOUT);
        assert_eq!(sender.await.unwrap(), Err(RelayError::NotConnected));
        assert_eq!(conn.state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_frame_ends_session() {
        let (conn, _inbound, mut relay, peer) = connected(3).await;

        peer.push(WsMessage::Close { code: 1001, reason: "going away".into() });
        assert!(relay.accept().await.is_some());
        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_session_is_replaced() {
        let (connector, mut relay) = memory_relay();
        let mut config = config(3);
        config.heartbeat_timeout = Some(Duration::from_secs(5));
        let (conn, _inbound) = RelayConnection::connect(config, connector);

        let _silent = relay.accept().await.unwrap();
        let _replacement = relay.accept().await.unwrap();
        let times = relay.attempt_times();
        // 5s of silence, then the 1s backoff.
        assert_eq!((times[1] - times[0]).as_secs(), 6);
        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_for_good() {
        let (conn, _inbound, relay, mut peer) = connected(3).await;

        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Stopped);
        assert!(matches!(peer.next_frame().await, Some(WsMessage::Close { code: 1000, .. })));

        let env = create_plain_envelope("desktop", "mobile", MessageType::Ack);
        assert_eq!(conn.send(&env).await, Err(RelayError::NotConnected));

        // Idempotent, and no further dialing happens.
        conn.disconnect().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(relay.attempt_times().len(), 1);
        assert_eq!(conn.state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_backoff() {
        let (connector, relay) = memory_relay();
        relay.set_refusing(true);
        let (conn, _inbound) = RelayConnection::connect(config(10), connector);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        conn.disconnect().await;
        let attempts = relay.attempt_times().len();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(relay.attempt_times().len(), attempts);
        assert!(!conn.wait_connected(Duration::from_secs(1)).await);
    }
}
