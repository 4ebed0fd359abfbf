use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A block of tool-result content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// What a tool execution produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
            details: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(message)],
            is_error: true,
            details: None,
        }
    }

    /// Extract the error message from an `is_error` outcome.
    ///
    /// Priority: first textual content block, then a `details.error` or
    /// `details.message` field, then the JSON encoding of `details`.
    pub fn error_message(&self) -> String {
        if let Some(ContentBlock::Text { text }) = self.content.first() {
            if !text.is_empty() {
                return text.clone();
            }
        }
        if let Some(details) = &self.details {
            for field in ["error", "message"] {
                if let Some(s) = details.get(field).and_then(|v| v.as_str()) {
                    return s.to_owned();
                }
            }
            return details.to_string();
        }
        "tool failed".into()
    }
}

/// A single problem found while validating tool input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path into the offending value (empty for the root).
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_text_content() {
        let outcome = ToolOutcome {
            content: vec![ContentBlock::text("boom")],
            is_error: true,
            details: Some(serde_json::json!({"error": "ignored"})),
        };
        assert_eq!(outcome.error_message(), "boom");
    }

    #[test]
    fn error_message_falls_back_to_details() {
        let outcome = ToolOutcome {
            content: vec![],
            is_error: true,
            details: Some(serde_json::json!({"message": "from details"})),
        };
        assert_eq!(outcome.error_message(), "from details");
    }

    #[test]
    fn error_message_encodes_unshaped_details() {
        let outcome = ToolOutcome {
            content: vec![],
            is_error: true,
            details: Some(serde_json::json!({"code": 7})),
        };
        assert_eq!(outcome.error_message(), r#"{"code":7}"#);
    }

    #[test]
    fn content_block_wire_shape() {
        let json = serde_json::to_value(ContentBlock::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hi"}));
    }
}
