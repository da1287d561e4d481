//! End-to-end tests: agent -> stdio server -> relay -> phone and back.
//!
//! The relay is the in-memory transport; the test plays the mobile app by
//! reading the desktop's frames off the relay and pushing sealed replies.

use std::sync::Arc;
use std::time::Duration;

use punchdown::config::StoredPairedDevice;
use punchdown::relay::memory::{memory_relay, MemoryPeer, MemoryRelay};
use punchdown::relay::protocol::ApprovalRequest;
use punchdown::relay::{create_envelope, Envelope, MessageType};
use punchdown::{mcp, DeviceIdentity, PunchdownConfig, Session, Settings};
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

struct Harness {
    desktop: DeviceIdentity,
    mobile: DeviceIdentity,
    session: Arc<Session>,
    _relay: MemoryRelay,
    phone: MemoryPeer,
    agent_in: DuplexStream,
    agent_out: Lines<BufReader<DuplexStream>>,
}

impl Harness {
    async fn start(settings: Settings) -> Self {
        let desktop = DeviceIdentity::generate(Some("https://relay.example.com".into()));
        let mobile = DeviceIdentity::generate(None);

        let mut config = PunchdownConfig::default();
        desktop.write_to_config(&mut config);
        config.paired_devices.push(StoredPairedDevice {
            id: mobile.device_id.clone(),
            name: "Phone".into(),
            public_key: mobile.signing_public_base64(),
            encryption_public_key: mobile.encryption.public_base64(),
            paired_at: "2026-03-01T12:00:00Z".into(),
        });

        let settings = Settings { relay_url: config.relay_url.clone(), ..settings };
        let (connector, mut relay) = memory_relay();
        let session = Arc::new(Session::start(&config, settings, connector).unwrap());
        let phone = relay.accept().await.unwrap();
        let connected = session.router().unwrap().connection().wait_connected(Duration::from_secs(2)).await;
        assert!(connected);

        let (agent_in, server_in) = duplex(64 * 1024);
        let (server_out, agent_out) = duplex(64 * 1024);
        tokio::spawn(mcp::serve(Arc::clone(&session), BufReader::new(server_in), server_out));

        Self {
            desktop,
            mobile,
            session,
            _relay: relay,
            phone,
            agent_in,
            agent_out: BufReader::new(agent_out).lines(),
        }
    }

    async fn call(&mut self, id: u64, tool: &str, arguments: Value) {
        let request = json!({
            "jsonrpc": "2.0", "id": id, "method": "tools/call",
            "params": { "name": tool, "arguments": arguments }
        });
        self.send(request).await;
    }

    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.agent_in.write_all(line.as_bytes()).await.unwrap();
    }

    async fn response(&mut self) -> Value {
        let line = self.agent_out.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Next envelope the desktop sent to the phone.
    async fn phone_receives(&mut self) -> Envelope {
        let text = self.phone.next_text().await.unwrap();
        Envelope::parse(&text).unwrap()
    }

    fn open(&self, envelope: &Envelope) -> Value {
        let plaintext = envelope
            .open(&self.desktop.encryption.public, self.mobile.encryption.secret())
            .unwrap();
        serde_json::from_slice(&plaintext).unwrap()
    }

    fn phone_replies(&self, to: &Envelope, message_type: MessageType, content: &Value) {
        let mut reply = create_envelope(
            &self.mobile.device_id,
            &self.desktop.device_id,
            message_type,
            content,
            &self.desktop.encryption.public,
            self.mobile.encryption.secret(),
        )
        .unwrap();
        reply.id = to.id;
        assert!(self.phone.push_text(reply.to_json().unwrap()));
    }
}

fn result_body(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn test_approval_round_trip() {
    let mut h = Harness::start(Settings::default()).await;

    h.call(1, "request_approval", json!({
        "action_summary": "Force-push to main",
        "risk_level": "high"
    }))
    .await;

    let request = h.phone_receives().await;
    assert_eq!(request.message_type, MessageType::RequestApproval);
    assert_eq!(request.from, h.desktop.device_id);
    assert_eq!(request.to, h.mobile.device_id);
    let content: ApprovalRequest = serde_json::from_value(h.open(&request)).unwrap();
    assert_eq!(content.action_summary, "Force-push to main");
    assert_eq!(content.options, vec!["approve", "deny"]);

    h.phone_replies(&request, MessageType::ApprovalResponse, &json!({ "decision": "deny", "user_message": "not today" }));

    let response = h.response().await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["isError"], false);
    assert_eq!(result_body(&response), json!({ "decision": "deny", "user_message": "not today" }));
    assert!(h.session.pending().is_empty());
}

#[tokio::test]
async fn test_overlapping_requests_resolve_independently() {
    let mut h = Harness::start(Settings::default()).await;

    h.call(1, "request_input", json!({ "question": "Branch name?" })).await;
    let first = h.phone_receives().await;
    h.call(2, "request_input", json!({ "question": "Commit message?" })).await;
    let second = h.phone_receives().await;
    assert_ne!(first.id, second.id);

    // Answer out of order.
    h.phone_replies(&second, MessageType::InputResponse, &json!({ "response": "fix: typo" }));
    let response = h.response().await;
    assert_eq!(response["id"], 2);
    assert_eq!(result_body(&response)["response"], "fix: typo");

    h.phone_replies(&first, MessageType::InputResponse, &json!({ "response": "feature/x" }));
    let response = h.response().await;
    assert_eq!(response["id"], 1);
    assert_eq!(result_body(&response)["response"], "feature/x");
}

#[tokio::test]
async fn test_agent_cancellation_reaches_pending_request() {
    let mut h = Harness::start(Settings::default()).await;

    h.call(5, "request_input", json!({ "question": "Deploy?" })).await;
    let request = h.phone_receives().await;
    assert_eq!(h.session.pending().len(), 1);

    h.send(json!({ "jsonrpc": "2.0", "method": "notifications/cancelled", "params": { "requestId": 5 } }))
        .await;
    let response = h.response().await;
    assert_eq!(response["id"], 5);
    assert_eq!(response["result"]["isError"], true);
    assert_eq!(result_body(&response)["status"], "cancelled");
    assert!(h.session.pending().is_empty());

    // A late answer is dropped quietly.
    h.phone_replies(&request, MessageType::InputResponse, &json!({ "response": "yes" }));
    h.call(6, "notify_status", json!({ "event": "progress", "message": "still here" })).await;
    assert_eq!(h.response().await["id"], 6);
}

#[tokio::test]
async fn test_forged_reply_does_not_resolve() {
    let settings = Settings { approval_timeout: Duration::from_millis(300), ..Settings::default() };
    let mut h = Harness::start(settings).await;

    h.call(1, "request_approval", json!({ "action_summary": "rm -rf build/" })).await;
    let request = h.phone_receives().await;

    // The relay (or anyone without the phone's key) forges an approval.
    let forger = DeviceIdentity::generate(None);
    let mut forged = create_envelope(
        &h.mobile.device_id,
        &h.desktop.device_id,
        MessageType::ApprovalResponse,
        &json!({ "decision": "approve" }),
        &h.desktop.encryption.public,
        forger.encryption.secret(),
    )
    .unwrap();
    forged.id = request.id;
    assert!(h.phone.push_text(forged.to_json().unwrap()));

    let response = h.response().await;
    assert_eq!(response["result"]["isError"], true);
    assert_eq!(result_body(&response)["status"], "timed_out");
}

#[tokio::test]
async fn test_status_and_context_are_sealed_for_the_phone() {
    let mut h = Harness::start(Settings::default()).await;

    h.call(1, "notify_status", json!({ "event": "milestone", "message": "tests green" })).await;
    assert_eq!(result_body(&h.response().await), json!({ "delivered": true }));
    let status = h.phone_receives().await;
    assert_eq!(status.message_type, MessageType::NotifyStatus);
    assert_eq!(h.open(&status)["message"], "tests green");

    h.call(2, "set_task_context", json!({ "task_title": "Upgrade tokio", "files_involved": ["Cargo.toml"] })).await;
    assert_eq!(result_body(&h.response().await), json!({ "updated": true }));
    let context = h.phone_receives().await;
    assert_eq!(context.message_type, MessageType::SetTaskContext);
    assert_eq!(h.open(&context)["files_involved"], json!(["Cargo.toml"]));

    // The relay only ever sees ciphertext.
    let wire = context.to_json().unwrap();
    assert!(!wire.contains("Upgrade tokio"));
}

#[tokio::test]
async fn test_phone_offline_fails_fast() {
    let mut h = Harness::start(Settings::default()).await;
    h.session.shutdown().await;

    h.call(1, "request_approval", json!({ "action_summary": "Merge PR" })).await;
    let response = h.response().await;
    assert_eq!(result_body(&response)["status"], "not_connected");

    h.call(2, "notify_status", json!({ "event": "error", "message": "build failed" })).await;
    assert_eq!(result_body(&h.response().await), json!({ "delivered": false }));
}
