use serde::{Deserialize, Serialize};

use crate::tool::ContentBlock;

/// A message in a session transcript (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User {
        text: String,
    },
    Assistant {
        parts: Vec<AssistantPart>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<ContentBlock>,
        #[serde(default)]
        is_error: bool,
    },
}

/// One part of an assistant message, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        kind: ReasoningMode,
    },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// Whether reasoning content is the raw chain or a provider summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningMode {
    Reasoning,
    Summary,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User { text: text.into() }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant {
            parts: vec![AssistantPart::Text { text: text.into() }],
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<ContentBlock>,
        is_error: bool,
    ) -> Self {
        Message::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content,
            is_error,
        }
    }

    /// All plain text carried by this message, joined with `"\n"`.
    ///
    /// Tool calls and reasoning parts are skipped.
    pub fn text(&self) -> String {
        match self {
            Message::User { text } => text.clone(),
            Message::Assistant { parts } => parts
                .iter()
                .filter_map(|p| match p {
                    AssistantPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Message::ToolResult { content, .. } => content
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.as_str(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl Message {
    /// Tool calls embedded in an assistant message, in emission order.
    pub fn tool_calls(&self) -> Vec<crate::tool::ToolCall> {
        match self {
            Message::Assistant { parts } => parts
                .iter()
                .filter_map(|p| match p {
                    AssistantPart::ToolCall { id, name, input } => Some(crate::tool::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
