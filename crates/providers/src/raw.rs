//! Typed raw provider events.
//!
//! Providers emit events named in the OpenAI responses dialect
//! (`response.output_text.delta`, …). [`RawProviderEvent::parse`] maps a
//! wire discriminator plus payload into the typed variant; anything the
//! runtime does not recognize is carried as [`RawProviderEvent::Other`],
//! never dropped.

use serde_json::Value;

use cw_domain::stream::Usage;

/// One event pulled from a provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RawProviderEvent {
    /// `response.created` — the stream is open.
    Created,
    /// `response.output_text.delta`
    OutputTextDelta { id: String, delta: String },
    /// `response.output_text.done`
    OutputTextDone { id: String },
    /// `response.reasoning_text.delta` / `response.reasoning_summary_text.delta`
    ReasoningDelta { id: String, delta: String },
    /// `response.reasoning_text.done` / `response.reasoning_summary_text.done`
    ReasoningDone { id: String },
    /// `response.output_item.added` with a `function_call` item.
    FunctionCallStart { id: String, name: String },
    /// `response.function_call_arguments.delta`
    FunctionCallArgumentsDelta { id: String, delta: String },
    /// `response.function_call_arguments.done`
    FunctionCallDone { id: String, name: String, arguments: String },
    /// `response.completed`
    Completed { usage: Option<Usage> },
    /// `response.failed`. `code`/`source` carry an upstream wire
    /// classification when the provider supplies one.
    Failed {
        message: String,
        code: Option<String>,
        source: Option<String>,
    },
    /// Any discriminator the runtime does not recognize.
    Other { event_type: String, payload: Value },
}

impl RawProviderEvent {
    /// Map a wire discriminator + payload onto a typed event.
    pub fn parse(event_type: &str, payload: Value) -> Self {
        fn str_field(payload: &Value, key: &str) -> String {
            payload.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_owned()
        }

        match event_type {
            "response.created" => RawProviderEvent::Created,
            "response.output_text.delta" => RawProviderEvent::OutputTextDelta {
                id: str_field(&payload, "item_id"),
                delta: str_field(&payload, "delta"),
            },
            "response.output_text.done" => RawProviderEvent::OutputTextDone {
                id: str_field(&payload, "item_id"),
            },
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                RawProviderEvent::ReasoningDelta {
                    id: str_field(&payload, "item_id"),
                    delta: str_field(&payload, "delta"),
                }
            }
            "response.reasoning_text.done" | "response.reasoning_summary_text.done" => {
                RawProviderEvent::ReasoningDone {
                    id: str_field(&payload, "item_id"),
                }
            }
            "response.output_item.added" => {
                let item = payload.get("item").cloned().unwrap_or(Value::Null);
                if item.get("type").and_then(|v| v.as_str()) == Some("function_call") {
                    RawProviderEvent::FunctionCallStart {
                        id: str_field(&item, "call_id"),
                        name: str_field(&item, "name"),
                    }
                } else {
                    RawProviderEvent::Other {
                        event_type: event_type.to_owned(),
                        payload,
                    }
                }
            }
            "response.function_call_arguments.delta" => {
                RawProviderEvent::FunctionCallArgumentsDelta {
                    id: str_field(&payload, "item_id"),
                    delta: str_field(&payload, "delta"),
                }
            }
            "response.function_call_arguments.done" => RawProviderEvent::FunctionCallDone {
                id: str_field(&payload, "item_id"),
                name: str_field(&payload, "name"),
                arguments: str_field(&payload, "arguments"),
            },
            "response.completed" => {
                let usage = payload
                    .get("response")
                    .and_then(|r| r.get("usage"))
                    .or_else(|| payload.get("usage"))
                    .map(|u| Usage {
                        prompt_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0)
                            as u32,
                        completion_tokens: u
                            .get("output_tokens")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0) as u32,
                        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0)
                            as u32,
                    });
                RawProviderEvent::Completed { usage }
            }
            "response.failed" => {
                let error = payload
                    .get("response")
                    .and_then(|r| r.get("error"))
                    .or_else(|| payload.get("error"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let message = error
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
                    .unwrap_or_else(|| {
                        if error.is_null() {
                            "provider stream failed".into()
                        } else {
                            error.to_string()
                        }
                    });
                let code = error.get("code").and_then(|v| v.as_str()).map(str::to_owned);
                let source = error.get("source").and_then(|v| v.as_str()).map(str::to_owned);
                RawProviderEvent::Failed { message, code, source }
            }
            _ => RawProviderEvent::Other {
                event_type: event_type.to_owned(),
                payload,
            },
        }
    }
}
