//! Relay envelope protocol.
//!
//! Every frame on the relay WebSocket is one JSON envelope:
//!
//! ```json
//! {
//!   "id": "9b2c...-uuid-v4",
//!   "from": "<sender device id>",
//!   "to": "<recipient device id>",
//!   "type": "request_approval",
//!   "timestamp": 1730000000000,
//!   "payload": { "ciphertext": "<base64>", "nonce": "<base64>" }
//! }
//! ```
//!
//! The relay sees only the routing header. `payload` is sealed end to end
//! with [`crate::crypto`] and is present exactly for message types that carry
//! application content. The envelope `id` doubles as the correlation key: a
//! response reuses the id of the request it answers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::{self, EncryptedPayload};
use crate::error::RelayError;

/// Enumerated envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Desktop asks the human to approve an action.
    RequestApproval,
    /// Desktop asks the human a free-form question.
    RequestInput,
    /// Desktop pushes a progress event.
    NotifyStatus,
    /// Desktop updates the task dashboard.
    SetTaskContext,
    /// Mobile answers a `request_approval`.
    ApprovalResponse,
    /// Mobile answers a `request_input`.
    InputResponse,
    /// Keepalive probe.
    Ping,
    /// Keepalive reply.
    Pong,
    /// Peer-reported error.
    Error,
    /// Delivery acknowledgement.
    Ack,
    /// Mobile finished pairing.
    PairingComplete,
}

/// Whether an envelope type must, may, or must not carry a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRule {
    /// Application content: payload required.
    Required,
    /// Keepalive/ack: payload forbidden.
    Forbidden,
    /// Either form accepted.
    Optional,
}

impl MessageType {
    /// Payload rule for this type.
    pub fn payload_rule(self) -> PayloadRule {
        match self {
            Self::RequestApproval
            | Self::RequestInput
            | Self::NotifyStatus
            | Self::SetTaskContext
            | Self::ApprovalResponse
            | Self::InputResponse => PayloadRule::Required,
            Self::Ping | Self::Pong | Self::Ack => PayloadRule::Forbidden,
            Self::Error | Self::PairingComplete => PayloadRule::Optional,
        }
    }

    /// Wire name (e.g. `"approval_response"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestApproval => "request_approval",
            Self::RequestInput => "request_input",
            Self::NotifyStatus => "notify_status",
            Self::SetTaskContext => "set_task_context",
            Self::ApprovalResponse => "approval_response",
            Self::InputResponse => "input_response",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::Ack => "ack",
            Self::PairingComplete => "pairing_complete",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relay frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per exchange; the correlation key.
    pub id: Uuid,
    /// Sender device id.
    pub from: String,
    /// Recipient device id.
    pub to: String,
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Sealed content, for types that carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EncryptedPayload>,
}

impl Envelope {
    /// Parse and validate a wire frame.
    ///
    /// Rejects anything that is not a schema-conforming envelope: bad JSON,
    /// non-UUID id, unknown type, empty `from`/`to`, or a payload that does
    /// not match the type's payload rule.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let envelope: Self = serde_json::from_str(text)
            .map_err(|e| RelayError::ProtocolViolation(format!("malformed envelope: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Check field-level invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.from.trim().is_empty() {
            return Err(RelayError::ProtocolViolation("empty 'from'".to_string()));
        }
        if self.to.trim().is_empty() {
            return Err(RelayError::ProtocolViolation("empty 'to'".to_string()));
        }
        match (self.message_type.payload_rule(), self.payload.is_some()) {
            (PayloadRule::Required, false) => Err(RelayError::ProtocolViolation(format!(
                "'{}' requires a payload",
                self.message_type
            ))),
            (PayloadRule::Forbidden, true) => Err(RelayError::ProtocolViolation(format!(
                "'{}' must not carry a payload",
                self.message_type
            ))),
            _ => Ok(()),
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::ProtocolViolation(format!("unserializable envelope: {e}")))
    }

    /// Build the keepalive reply to this ping: same id, `from`/`to` swapped.
    pub fn pong_reply(&self) -> Self {
        Self {
            id: self.id,
            from: self.to.clone(),
            to: self.from.clone(),
            message_type: MessageType::Pong,
            timestamp: now_millis(),
            payload: None,
        }
    }

    /// Open the sealed payload.
    ///
    /// A missing payload is reported as [`RelayError::ProtocolViolation`];
    /// any cryptographic failure as [`RelayError::DecryptionFailed`].
    pub fn open(
        &self,
        sender_public: &PublicKey,
        recipient_secret: &StaticSecret,
    ) -> Result<Vec<u8>, RelayError> {
        let payload = self.payload.as_ref().ok_or_else(|| {
            RelayError::ProtocolViolation(format!("'{}' has no payload", self.message_type))
        })?;
        crypto::decrypt(payload, sender_public, recipient_secret)
    }
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Build an envelope whose `content` is serialized to JSON and sealed for
/// `recipient_public`.
pub fn create_envelope<T: Serialize + ?Sized>(
    from: &str,
    to: &str,
    message_type: MessageType,
    content: &T,
    recipient_public: &PublicKey,
    sender_secret: &StaticSecret,
) -> Result<Envelope, RelayError> {
    let plaintext = serde_json::to_vec(content)
        .map_err(|e| RelayError::ProtocolViolation(format!("unserializable content: {e}")))?;
    let payload = crypto::encrypt(&plaintext, recipient_public, sender_secret)?;
    Ok(Envelope {
        id: Uuid::new_v4(),
        from: from.to_string(),
        to: to.to_string(),
        message_type,
        timestamp: now_millis(),
        payload: Some(payload),
    })
}

/// Build a control envelope with no payload.
pub fn create_plain_envelope(from: &str, to: &str, message_type: MessageType) -> Envelope {
    Envelope {
        id: Uuid::new_v4(),
        from: from.to_string(),
        to: to.to_string(),
        message_type,
        timestamp: now_millis(),
        payload: None,
    }
}

// ============================================================================
// Decrypted payload shapes
// ============================================================================

/// Risk assessment attached to an approval request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine change.
    Low,
    /// Default.
    #[default]
    Medium,
    /// Destructive or irreversible.
    High,
}

/// `request_approval` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// One-line summary of the action.
    pub action_summary: String,
    /// Longer description of the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Risk assessment.
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Choices offered to the human.
    #[serde(default = "default_approval_options")]
    pub options: Vec<String>,
}

fn default_approval_options() -> Vec<String> {
    vec!["approve".to_string(), "deny".to_string()]
}

/// `request_input` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    /// The question.
    pub question: String,
    /// Background for the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Suggested answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

/// `approval_response` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// The option the human picked.
    pub decision: String,
    /// Optional note from the human.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
}

/// `input_response` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputResponse {
    /// The human's answer.
    pub response: String,
}

/// Kind of status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusEvent {
    /// Significant checkpoint reached.
    Milestone,
    /// Incremental progress.
    Progress,
    /// Something went wrong.
    Error,
    /// Task finished.
    Complete,
}

/// `notify_status` content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotification {
    /// Event kind.
    pub event: StatusEvent,
    /// Human-readable message.
    pub message: String,
    /// Free-form structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// `set_task_context` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Title of the current task.
    pub task_title: String,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_description: Option<String>,
    /// Free-form ETA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<String>,
    /// Files being touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_involved: Option<Vec<String>>,
}
