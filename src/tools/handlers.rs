//! Tool handlers.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::ToolResult;
use crate::constants::{DEFAULT_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT};
use crate::error::RelayError;
use crate::relay::protocol::{ApprovalRequest, InputRequest, StatusNotification, TaskContext};
use crate::relay::{MessageRouter, MessageType, RequestKind};
use crate::session::{Link, Session};

/// `request_input` arguments: the request content plus its deadline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestInputArgs {
    /// Content sent to the peer.
    #[serde(flatten)]
    pub request: InputRequest,
    /// Seconds to wait for an answer.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
}

fn default_timeout_seconds() -> f64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs_f64()
}

/// Router for a blocking call, or the error result explaining its absence.
fn require_router(session: &Session) -> Result<&MessageRouter, ToolResult> {
    match session.link() {
        Link::Ready(router) => Ok(router),
        Link::NoIdentity => Err(ToolResult::status(
            "not_paired",
            "This device has no identity yet. Run `punchdown init`, then `punchdown pair`.",
        )),
        Link::NotPaired => Err(ToolResult::status(
            "not_paired",
            "No paired device. Run `punchdown pair` and scan the code with the mobile app.",
        )),
        Link::NoRelay => Err(ToolResult::status(
            "not_connected",
            "No relay URL configured. Set PUNCHDOWN_RELAY_URL or run `punchdown init --relay-url`.",
        )),
    }
}

fn outcome_to_result(outcome: Result<Value, RelayError>, what: &str) -> ToolResult {
    match outcome {
        Ok(content) => ToolResult::json(&content),
        Err(RelayError::TimedOut) => {
            ToolResult::status("timed_out", format!("No {what} arrived before the deadline"))
        }
        Err(RelayError::Cancelled) => {
            ToolResult::status("cancelled", format!("The {what} request was cancelled"))
        }
        Err(RelayError::NotConnected) => ToolResult::status(
            "not_connected",
            format!("Not connected to the relay; the {what} request was not sent"),
        ),
        Err(e) => ToolResult::status(e.status(), e.to_string()),
    }
}

/// Ask the human to approve an action and wait for the decision.
pub async fn request_approval(
    session: &Session,
    args: ApprovalRequest,
    cancel: &CancellationToken,
) -> ToolResult {
    let router = match require_router(session) {
        Ok(router) => router,
        Err(result) => return result,
    };
    log::info!("Approval requested: {} ({:?})", args.action_summary, args.risk_level);

    let outcome = router
        .request(
            MessageType::RequestApproval,
            RequestKind::Approval,
            &args,
            session.settings().approval_timeout,
            cancel,
        )
        .await;
    outcome_to_result(outcome, "approval")
}

/// Ask the human a question and wait for the answer.
pub async fn request_input(
    session: &Session,
    args: RequestInputArgs,
    cancel: &CancellationToken,
) -> ToolResult {
    let timeout = match Duration::try_from_secs_f64(args.timeout_seconds) {
        Ok(timeout) if !timeout.is_zero() && timeout <= MAX_REQUEST_TIMEOUT => timeout,
        _ => {
            return ToolResult::status(
                "invalid_arguments",
                format!(
                    "timeout_seconds must be a positive number no greater than {}, got {}",
                    MAX_REQUEST_TIMEOUT.as_secs(),
                    args.timeout_seconds
                ),
            );
        }
    };
    let router = match require_router(session) {
        Ok(router) => router,
        Err(result) => return result,
    };
    log::info!("Input requested: {}", args.request.question);

    let outcome = router
        .request(MessageType::RequestInput, RequestKind::Input, &args.request, timeout, cancel)
        .await;
    outcome_to_result(outcome, "input")
}

/// Push a status event. Never blocks on the human.
pub async fn notify_status(session: &Session, args: StatusNotification) -> ToolResult {
    log::info!("Status: [{:?}] {}", args.event, args.message);
    let delivered = match session.router() {
        Some(router) => router.notify(MessageType::NotifyStatus, &args).await,
        None => false,
    };
    ToolResult::json(&json!({ "delivered": delivered }))
}

/// Update the task dashboard. Never blocks on the human.
pub async fn set_task_context(session: &Session, args: TaskContext) -> ToolResult {
    log::info!("Task context: {}", args.task_title);
    let updated = match session.router() {
        Some(router) => router.notify(MessageType::SetTaskContext, &args).await,
        None => false,
    };
    ToolResult::json(&json!({ "updated": updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::relay::PendingRequests;

    fn session(link: Link) -> Session {
        Session::new(link, PendingRequests::new(), Settings::default())
    }

    fn approval() -> ApprovalRequest {
        serde_json::from_value(json!({ "action_summary": "Push to main" })).unwrap()
    }

    #[test]
    fn test_input_args_defaults() {
        let args: RequestInputArgs = serde_json::from_value(json!({ "question": "Which branch?" })).unwrap();
        assert_eq!(args.timeout_seconds, 300.0);
        assert_eq!(args.request.question, "Which branch?");
        assert_eq!(args.request.suggestions, None);
    }

    #[test]
    fn test_approval_args_defaults() {
        let args = approval();
        assert_eq!(args.options, vec!["approve", "deny"]);
        assert_eq!(args.risk_level, crate::relay::protocol::RiskLevel::Medium);
    }

    #[tokio::test]
    async fn test_blocking_tools_report_not_paired() {
        let result = request_approval(&session(Link::NotPaired), approval(), &CancellationToken::new()).await;
        assert!(result.is_error);
        assert_eq!(result.json_body().unwrap()["status"], "not_paired");

        let result = request_approval(&session(Link::NoIdentity), approval(), &CancellationToken::new()).await;
        assert_eq!(result.json_body().unwrap()["status"], "not_paired");
    }

    #[tokio::test]
    async fn test_blocking_tools_report_missing_relay() {
        let args: RequestInputArgs = serde_json::from_value(json!({ "question": "?" })).unwrap();
        let result = request_input(&session(Link::NoRelay), args, &CancellationToken::new()).await;
        assert_eq!(result.json_body().unwrap()["status"], "not_connected");
    }

    #[tokio::test]
    async fn test_bad_timeout_is_rejected() {
        for bad in [json!(0), json!(-5), json!(1e19), json!(1e300), json!(86_401)] {
            let args: RequestInputArgs =
                serde_json::from_value(json!({ "question": "?", "timeout_seconds": bad })).unwrap();
            let result = request_input(&session(Link::NotPaired), args, &CancellationToken::new()).await;
            assert_eq!(result.json_body().unwrap()["status"], "invalid_arguments");
        }
    }

    #[tokio::test]
    async fn test_longest_timeout_is_accepted() {
        let args: RequestInputArgs =
            serde_json::from_value(json!({ "question": "?", "timeout_seconds": 86_400 })).unwrap();
        let result = request_input(&session(Link::NotPaired), args, &CancellationToken::new()).await;
        assert_eq!(result.json_body().unwrap()["status"], "not_paired");
    }

    #[tokio::test]
    async fn test_fire_and_forget_without_peer_reports_false() {
        let status: StatusNotification =
            serde_json::from_value(json!({ "event": "progress", "message": "halfway" })).unwrap();
        let result = notify_status(&session(Link::NotPaired), status).await;
        assert!(!result.is_error);
        assert_eq!(result.json_body().unwrap(), json!({ "delivered": false }));

        let context: TaskContext = serde_json::from_value(json!({ "task_title": "Refactor" })).unwrap();
        let result = set_task_context(&session(Link::NoRelay), context).await;
        assert_eq!(result.json_body().unwrap(), json!({ "updated": false }));
    }

    #[test]
    fn test_outcome_mapping() {
        let ok = outcome_to_result(Ok(json!({ "decision": "approve" })), "approval");
        assert!(!ok.is_error);
        assert_eq!(ok.json_body().unwrap()["decision"], "approve");

        for (err, status) in [
            (RelayError::TimedOut, "timed_out"),
            (RelayError::Cancelled, "cancelled"),
            (RelayError::NotConnected, "not_connected"),
        ] {
            let result = outcome_to_result(Err(err), "approval");
            assert!(result.is_error);
            assert_eq!(result.json_body().unwrap()["status"], status);
        }
    }
}
