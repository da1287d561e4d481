//! Agent-facing tools.
//!
//! Four tools reach the human through the relay:
//!
//! | Tool | Blocks | Result |
//! |------|--------|--------|
//! | `request_approval` | yes | decrypted `approval_response` content |
//! | `request_input` | yes | decrypted `input_response` content |
//! | `notify_status` | no | `{"delivered": bool}` |
//! | `set_task_context` | no | `{"updated": bool}` |
//!
//! Every call ends in a [`ToolResult`]; transport trouble, timeouts and bad
//! arguments become `isError` results rather than faults, so an agent is
//! never left hanging.

mod handlers;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::session::Session;

pub use handlers::{
    notify_status, request_approval, request_input, set_task_context, RequestInputArgs,
};

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Plain text (JSON-encoded for every tool here).
    Text {
        /// The text.
        text: String,
    },
}

/// Result of a tool call, in tool-call protocol shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content blocks.
    pub content: Vec<ToolContent>,
    /// Whether the call failed.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result whose text is `value` as JSON.
    pub fn json(value: &Value) -> Self {
        Self { content: vec![ToolContent::Text { text: value.to_string() }], is_error: false }
    }

    /// Failed result with text `{"status", "message"}`.
    pub fn status(status: &str, message: impl Into<String>) -> Self {
        let body = json!({ "status": status, "message": message.into() });
        Self { content: vec![ToolContent::Text { text: body.to_string() }], is_error: true }
    }

    /// Failed result with plain text.
    pub fn error_text(text: impl Into<String>) -> Self {
        Self { content: vec![ToolContent::Text { text: text.into() }], is_error: true }
    }

    /// Text of the first content block.
    pub fn text(&self) -> &str {
        match self.content.first() {
            Some(ToolContent::Text { text }) => text,
            None => "",
        }
    }

    /// First content block parsed as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(self.text()).ok()
    }
}

/// Catalog entry advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: &'static str,
    /// What the tool does, for the agent.
    pub description: &'static str,
    /// JSON Schema of the arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The tool catalog.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "request_approval",
            description: "Request approval from the user for an action. Blocks until the user responds via the Punchdown mobile app.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action_summary": { "type": "string", "description": "Brief summary of the action requiring approval" },
                    "details": { "type": "string", "description": "Detailed description of changes" },
                    "risk_level": { "type": "string", "enum": ["low", "medium", "high"], "description": "Risk assessment" },
                    "options": { "type": "array", "items": { "type": "string" }, "description": "Available response options" }
                },
                "required": ["action_summary"]
            }),
        },
        ToolDefinition {
            name: "request_input",
            description: "Request free-form input from the user. Blocks until the user responds via the Punchdown mobile app.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string", "description": "Question to ask the user" },
                    "context": { "type": "string", "description": "Additional context for the question" },
                    "suggestions": { "type": "array", "items": { "type": "string" }, "description": "Suggested responses" },
                    "timeout_seconds": { "type": "number", "description": "Timeout in seconds" }
                },
                "required": ["question"]
            }),
        },
        ToolDefinition {
            name: "notify_status",
            description: "Send a status update to the user's mobile device. Does not block the agent.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "event": { "type": "string", "enum": ["milestone", "progress", "error", "complete"], "description": "Type of status event" },
                    "message": { "type": "string", "description": "Human-readable status message" },
                    "metadata": { "type": "object", "additionalProperties": true, "description": "Additional structured data" }
                },
                "required": ["event", "message"]
            }),
        },
        ToolDefinition {
            name: "set_task_context",
            description: "Update the mobile dashboard with current task information. Does not block the agent.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task_title": { "type": "string", "description": "Title of the current task" },
                    "task_description": { "type": "string", "description": "Detailed task description" },
                    "estimated_completion": { "type": "string", "description": "Estimated time to completion" },
                    "files_involved": { "type": "array", "items": { "type": "string" }, "description": "List of files being worked on" }
                },
                "required": ["task_title"]
            }),
        },
    ]
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolResult> {
    serde_json::from_value(arguments).map_err(|e| {
        ToolResult::status("invalid_arguments", format!("Invalid arguments for {tool}: {e}"))
    })
}

/// Run tool `name`. `cancel` aborts a blocking call.
pub async fn call_tool(
    session: &Session,
    name: &str,
    arguments: Value,
    cancel: &CancellationToken,
) -> ToolResult {
    // A missing arguments object means "all defaults".
    let arguments = if arguments.is_null() { json!({}) } else { arguments };

    match name {
        "request_approval" => match parse_args(name, arguments) {
            Ok(args) => request_approval(session, args, cancel).await,
            Err(result) => result,
        },
        "request_input" => match parse_args(name, arguments) {
            Ok(args) => request_input(session, args, cancel).await,
            Err(result) => result,
        },
        "notify_status" => match parse_args(name, arguments) {
            Ok(args) => notify_status(session, args).await,
            Err(result) => result,
        },
        "set_task_context" => match parse_args(name, arguments) {
            Ok(args) => set_task_context(session, args).await,
            Err(result) => result,
        },
        _ => ToolResult::error_text(format!("Unknown tool: {name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::relay::PendingRequests;
    use crate::session::Link;

    fn unpaired() -> Session {
        Session::new(Link::NotPaired, PendingRequests::new(), Settings::default())
    }

    #[test]
    fn test_catalog_names_and_required_fields() {
        let defs = tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name).collect();
        assert_eq!(names, ["request_approval", "request_input", "notify_status", "set_task_context"]);

        let wire = serde_json::to_value(&defs[0]).unwrap();
        assert_eq!(wire["inputSchema"]["required"], json!(["action_summary"]));
        assert_eq!(wire["inputSchema"]["properties"]["risk_level"]["enum"], json!(["low", "medium", "high"]));
    }

    #[test]
    fn test_status_result_shape() {
        let result = ToolResult::status("timed_out", "no answer");
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["isError"], true);
        assert_eq!(wire["content"][0]["type"], "text");
        let body = result.json_body().unwrap();
        assert_eq!(body, json!({ "status": "timed_out", "message": "no answer" }));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let result = call_tool(&unpaired(), "rm_rf", json!({}), &CancellationToken::new()).await;
        assert!(result.is_error);
        assert_eq!(result.text(), "Unknown tool: rm_rf");
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_error_results() {
        let session = unpaired();
        let cancel = CancellationToken::new();

        let result = call_tool(&session, "request_approval", json!({ "risk_level": "extreme" }), &cancel).await;
        assert!(result.is_error);
        assert_eq!(result.json_body().unwrap()["status"], "invalid_arguments");

        let result = call_tool(&session, "notify_status", json!({ "event": "party", "message": "hi" }), &cancel).await;
        assert_eq!(result.json_body().unwrap()["status"], "invalid_arguments");

        let result = call_tool(&session, "set_task_context", Value::Null, &cancel).await;
        assert_eq!(result.json_body().unwrap()["status"], "invalid_arguments");
    }
}
