//! JSON-RPC 2.0 framing for the MCP protocol.
//!
//! One JSON object per message. Requests carry an `id` and expect a
//! response; notifications do not.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cw_domain::tool::{ContentBlock, ToolOutcome};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An outbound frame: request when `id` is set, notification otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundFrame {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutboundFrame {
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".into(), id: Some(id), method: method.into(), params }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self { jsonrpc: "2.0".into(), id: None, method: method.into(), params: None }
    }
}

/// An inbound response frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseFrame {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ResponseFrame {
    /// Unwrap into the result value or the error object.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool advertised by a server via `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "open_object_schema")]
    pub input_schema: Value,
}

fn open_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ServerTool>,
}

/// One content item in a `tools/call` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

/// The result payload from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    pub content: Vec<CallContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallResult {
    /// Map onto the runtime's tool outcome. Non-text content blocks are
    /// carried as their JSON encoding.
    pub fn into_outcome(self) -> ToolOutcome {
        let content = self
            .content
            .into_iter()
            .map(|c| {
                if c.content_type == "text" {
                    ContentBlock::text(c.text)
                } else {
                    ContentBlock::text(
                        serde_json::json!({"type": c.content_type, "text": c.text}).to_string(),
                    )
                }
            })
            .collect();
        ToolOutcome { content, is_error: self.is_error, details: None }
    }
}

/// Parameters for the `initialize` request.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "coworker",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Parameters for a `tools/call` request.
pub fn call_params(tool: &str, arguments: Value) -> Value {
    serde_json::json!({ "name": tool, "arguments": arguments })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool naming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The registry-wide name of an MCP-hosted tool.
pub fn scoped_tool_name(server: &str, tool: &str) -> String {
    format!("mcp__{server}__{tool}")
}

/// Split a scoped name back into `(server, tool)`.
pub fn split_scoped_name(name: &str) -> Option<(&str, &str)> {
    name.strip_prefix("mcp__")?.split_once("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_carries_id() {
        let frame = OutboundFrame::request(7, "tools/list", None);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"id\":7"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn notification_frame_has_no_id() {
        let frame = OutboundFrame::notification("notifications/initialized");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn response_into_result_success_and_error() {
        let ok: ResponseFrame =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#).unwrap();
        assert!(ok.into_result().is_ok());

        let err: ResponseFrame = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        let rpc_err = err.into_result().unwrap_err();
        assert_eq!(rpc_err.code, -32601);
        assert_eq!(format!("{rpc_err}"), "JSON-RPC error -32601: Method not found");
    }

    #[test]
    fn tools_list_defaults_schema_and_description() {
        let result: ToolsListResult =
            serde_json::from_str(r#"{"tools":[{"name":"ping"}]}"#).unwrap();
        assert_eq!(result.tools[0].description, "");
        assert_eq!(result.tools[0].input_schema["type"], "object");
    }

    #[test]
    fn call_result_maps_to_outcome() {
        let result: CallResult = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"not found"}],"isError":true}"#,
        )
        .unwrap();
        let outcome = result.into_outcome();
        assert!(outcome.is_error);
        assert_eq!(outcome.error_message(), "not found");
    }

    #[test]
    fn scoped_names_roundtrip() {
        let name = scoped_tool_name("files", "read");
        assert_eq!(name, "mcp__files__read");
        assert_eq!(split_scoped_name(&name), Some(("files", "read")));
        assert_eq!(split_scoped_name("bash"), None);
    }
}
