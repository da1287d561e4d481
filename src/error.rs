//! Error taxonomy for the relay core.
//!
//! Inbound-path failures (`DecryptionFailed`, `ProtocolViolation`) are
//! swallowed at the router boundary. Outbound failures and pending-request
//! terminal states are returned to the originating call.

/// Errors raised by the encryption engine, envelope protocol, connection
/// manager and pending request store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Authentication tag did not verify. The cause is never disclosed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Send attempted while the relay session is not `Connected`.
    #[error("not connected to relay")]
    NotConnected,

    /// No correlated response arrived before the deadline.
    #[error("request timed out")]
    TimedOut,

    /// The request was explicitly aborted.
    #[error("request cancelled")]
    Cancelled,

    /// Frame was not a well-formed envelope.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reconnect attempts were used up; the session is gone for good.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    /// Key material had the wrong length or encoding.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The transport failed to open or write.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RelayError {
    /// Short machine-readable tag used in tool results.
    pub fn status(&self) -> &'static str {
        match self {
            Self::DecryptionFailed => "decryption_failed",
            Self::NotConnected => "not_connected",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::ReconnectExhausted { .. } => "reconnect_exhausted",
            Self::InvalidKey(_) => "invalid_key",
            Self::Transport(_) => "transport_error",
        }
    }
}
