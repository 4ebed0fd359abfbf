//! OpenAI responses-API adapter.
//!
//! Speaks the streaming responses dialect directly; anything else the
//! endpoint emits flows through as `Other` events and survives
//! normalization as `unknown` parts.

use cw_domain::error::{Error, Result};
use cw_domain::message::{AssistantPart, Message};
use serde_json::{json, Value};

use crate::credentials::CredentialMaterial;
use crate::raw::RawProviderEvent;
use crate::traits::{BoxStream, ProviderFamily, ProviderStream, StreamRequest};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("building provider HTTP client: {e}")))?;
        Ok(Self {
            id: "openai".into(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    fn request_body(req: &StreamRequest) -> Value {
        let mut input = Vec::new();
        for message in &req.messages {
            push_message(&mut input, message);
        }

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();

        let mut body = json!({
            "model": req.model,
            "instructions": req.system,
            "input": input,
            "tools": tools,
            "stream": true,
        });
        if let Value::Object(options) = &req.provider_options {
            if let Value::Object(map) = &mut body {
                for (key, value) in options {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        body
    }
}

/// Flatten one transcript message into responses-API input items.
fn push_message(input: &mut Vec<Value>, message: &Message) {
    match message {
        Message::User { text } => {
            input.push(json!({"role": "user", "content": text}));
        }
        Message::Assistant { parts } => {
            for part in parts {
                match part {
                    AssistantPart::Text { text } => {
                        input.push(json!({"role": "assistant", "content": text}));
                    }
                    AssistantPart::ToolCall { id, name, input: args } => {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": id,
                            "name": name,
                            "arguments": args.to_string(),
                        }));
                    }
                    // Reasoning is not replayed to the provider.
                    AssistantPart::Reasoning { .. } => {}
                }
            }
        }
        Message::ToolResult { tool_call_id, content, .. } => {
            let text: Vec<&str> = content
                .iter()
                .map(|b| match b {
                    cw_domain::tool::ContentBlock::Text { text } => text.as_str(),
                })
                .collect();
            input.push(json!({
                "type": "function_call_output",
                "call_id": tool_call_id,
                "output": text.join("\n"),
            }));
        }
    }
}

#[async_trait::async_trait]
impl ProviderStream for OpenAiProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAi
    }

    async fn stream(
        &self,
        req: StreamRequest,
        credentials: &CredentialMaterial,
    ) -> Result<BoxStream<'static, Result<RawProviderEvent>>> {
        let url = format!("{}/responses", self.base_url);
        let body = Self::request_body(&req);

        let mut http = self
            .client
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .json(&body);
        for (key, value) in &credentials.extra_headers {
            http = http.header(key, value);
        }

        let response = http
            .send()
            .await
            .map_err(|e| Error::Provider { provider: self.id.clone(), message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {}: {}", status.as_u16(), body),
            });
        }

        Ok(crate::sse::response_event_stream(response))
    }
}
