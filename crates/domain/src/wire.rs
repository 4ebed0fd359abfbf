//! Wire protocol between clients and the server.
//!
//! One JSON message per WebSocket frame. Server frames carry
//! `{ type, session_id, ... }`; the envelope adds `session_id` and the
//! tagged [`ServerEvent`] supplies `type` plus the body.

use serde::{Deserialize, Serialize};

use crate::config::{McpServerConfig, SessionConfig};
use crate::error::{ErrorCode, ErrorSource};
use crate::message::ReasoningMode;
use crate::stream::StreamPart;
use crate::tool::ToolOutcome;

/// Bumped when a server event changes shape incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Ask answers equal to this sentinel mean "the human skipped the question".
pub const ASK_SKIP_TOKEN: &str = "__skip__";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Envelope for every server-originated frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    pub session_id: String,
    #[serde(flatten)]
    pub event: ServerEvent,
}

/// Server-originated event bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ServerHello {
        protocol_version: u32,
        config: SessionConfig,
    },
    UserMessage {
        text: String,
    },
    AssistantMessage {
        text: String,
    },
    Reasoning {
        text: String,
        kind: ReasoningMode,
    },
    ModelStreamChunk {
        part: StreamPart,
    },
    ToolCall {
        key: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        key: String,
        name: String,
        output: ToolOutcome,
    },
    Ask {
        request_id: String,
        question: String,
    },
    Approval {
        request_id: String,
        command: String,
        dangerous: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_code: Option<String>,
    },
    Todos {
        todos: Vec<TodoItem>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Error {
        message: String,
        code: ErrorCode,
        source: ErrorSource,
    },
    SessionSettings {
        enable_mcp: bool,
        yolo: bool,
    },
    McpServers {
        servers: Vec<McpServerConfig>,
    },
    ProviderCatalog {
        providers: Vec<ProviderInfo>,
    },
    ProviderAuthMethods {
        provider: String,
        methods: Vec<AuthMethod>,
    },
    ProviderStatus {
        statuses: Vec<ProviderStatusEntry>,
    },
    /// Terminal frame sent to a subscriber removed by the event bus.
    Dropped {
        reason: DropReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    SlowConsumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A per-session todo entry, driven by the `todo_write` tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

/// Catalog entry for a known provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub label: String,
    pub auth_methods: Vec<AuthMethod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    Oauth,
}

/// Whether credentials currently resolve for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatusEntry {
    pub provider: String,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client-originated messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    UserMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_message_id: Option<String>,
    },
    AskResponse {
        request_id: String,
        answer: String,
    },
    ApprovalResponse {
        request_id: String,
        approved: bool,
    },
    Cancel,
    ConnectProvider {
        provider: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_flow: Option<AuthMethod>,
    },
    ProviderCatalogGet,
    ProviderAuthMethodsGet {
        provider: String,
    },
    RefreshProviderStatus,
    McpServersGet,
    McpServerUpsert {
        server: McpServerConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_name: Option<String>,
    },
    McpServerDelete {
        name: String,
    },
    SetEnableMcp {
        enable_mcp: bool,
    },
    Reset,
}
