//! Raw-event normalization.
//!
//! A [`Normalizer`] consumes one provider stream's raw events and
//! produces the canonical [`StreamPart`] sequence while aggregating the
//! assistant message, tool calls, and usage for the step. Providers that
//! only emit argument deltas (no `done` event) still yield complete tool
//! calls: unfinished buffers are assembled when the stream completes.

use std::collections::HashMap;

use serde_json::Value;

use cw_domain::message::{AssistantPart, Message, ReasoningMode};
use cw_domain::stream::{StopReason, StreamPart, Usage};
use cw_domain::tool::ToolCall;

use crate::raw::RawProviderEvent;
use crate::traits::ProviderFamily;

/// What one normalized step produced.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub message: Message,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub reason: StopReason,
    pub failure: Option<StreamFailure>,
}

/// Upstream failure details, classification passed through verbatim.
#[derive(Debug, Clone)]
pub struct StreamFailure {
    pub message: String,
    pub code: Option<String>,
    pub source: Option<String>,
}

struct ToolBuf {
    name: String,
    args: String,
}

/// Stateful raw → canonical translator for a single step.
pub struct Normalizer {
    mode: ReasoningMode,
    parts: Vec<AssistantPart>,
    open_text: HashMap<String, usize>,
    open_reasoning: HashMap<String, usize>,
    tool_bufs: HashMap<String, ToolBuf>,
    tool_order: Vec<String>,
    usage: Option<Usage>,
    failed: Option<StreamFailure>,
}

impl Normalizer {
    pub fn new(family: ProviderFamily) -> Self {
        let mode = match family {
            ProviderFamily::OpenAi => ReasoningMode::Summary,
            _ => ReasoningMode::Reasoning,
        };
        Self {
            mode,
            parts: Vec::new(),
            open_text: HashMap::new(),
            open_reasoning: HashMap::new(),
            tool_bufs: HashMap::new(),
            tool_order: Vec::new(),
            usage: None,
            failed: None,
        }
    }

    /// Translate one raw event into zero or more canonical parts.
    pub fn handle(&mut self, raw: RawProviderEvent) -> Vec<StreamPart> {
        match raw {
            RawProviderEvent::Created => Vec::new(),

            RawProviderEvent::OutputTextDelta { id, delta } => {
                let mut out = Vec::new();
                let idx = match self.open_text.get(&id) {
                    Some(&idx) => idx,
                    None => {
                        out.push(StreamPart::TextStart { id: id.clone() });
                        self.parts.push(AssistantPart::Text { text: String::new() });
                        let idx = self.parts.len() - 1;
                        self.open_text.insert(id.clone(), idx);
                        idx
                    }
                };
                if let AssistantPart::Text { text } = &mut self.parts[idx] {
                    text.push_str(&delta);
                }
                out.push(StreamPart::TextDelta { id, text: delta });
                out
            }

            RawProviderEvent::OutputTextDone { id } => {
                if self.open_text.remove(&id).is_some() {
                    vec![StreamPart::TextEnd { id }]
                } else {
                    Vec::new()
                }
            }

            RawProviderEvent::ReasoningDelta { id, delta } => {
                let mut out = Vec::new();
                let idx = match self.open_reasoning.get(&id) {
                    Some(&idx) => idx,
                    None => {
                        out.push(StreamPart::ReasoningStart { id: id.clone(), mode: self.mode });
                        self.parts.push(AssistantPart::Reasoning {
                            text: String::new(),
                            kind: self.mode,
                        });
                        let idx = self.parts.len() - 1;
                        self.open_reasoning.insert(id.clone(), idx);
                        idx
                    }
                };
                if let AssistantPart::Reasoning { text, .. } = &mut self.parts[idx] {
                    text.push_str(&delta);
                }
                out.push(StreamPart::ReasoningDelta { id, mode: self.mode, text: delta });
                out
            }

            RawProviderEvent::ReasoningDone { id } => {
                if self.open_reasoning.remove(&id).is_some() {
                    vec![StreamPart::ReasoningEnd { id, mode: self.mode }]
                } else {
                    Vec::new()
                }
            }

            RawProviderEvent::FunctionCallStart { id, name } => {
                self.tool_bufs
                    .insert(id.clone(), ToolBuf { name: name.clone(), args: String::new() });
                self.tool_order.push(id.clone());
                vec![StreamPart::ToolInputStart { key: id, name }]
            }

            RawProviderEvent::FunctionCallArgumentsDelta { id, delta } => {
                let buf = self.tool_bufs.entry(id.clone()).or_insert_with(|| {
                    self.tool_order.push(id.clone());
                    ToolBuf { name: String::new(), args: String::new() }
                });
                buf.args.push_str(&delta);
                vec![StreamPart::ToolInputDelta { key: id, delta }]
            }

            RawProviderEvent::FunctionCallDone { id, name, arguments } => {
                self.tool_bufs.remove(&id);
                self.tool_order.retain(|k| k != &id);
                let input = parse_arguments(&id, &name, &arguments);
                self.parts.push(AssistantPart::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                vec![
                    StreamPart::ToolInputEnd { key: id.clone(), name: name.clone() },
                    StreamPart::ToolCall { key: id, name, input },
                ]
            }

            RawProviderEvent::Completed { usage } => {
                self.usage = usage;
                self.close_open_blocks()
            }

            RawProviderEvent::Failed { message, code, source } => {
                self.failed = Some(StreamFailure { message: message.clone(), code, source });
                vec![StreamPart::Error { message }]
            }

            RawProviderEvent::Other { event_type, payload } => {
                vec![StreamPart::Unknown { part_type: event_type, payload }]
            }
        }
    }

    /// Close dangling text/reasoning blocks and assemble tool calls that
    /// came through start/delta but never saw a `done` event.
    fn close_open_blocks(&mut self) -> Vec<StreamPart> {
        let mut out = Vec::new();

        for (id, _) in std::mem::take(&mut self.open_text) {
            out.push(StreamPart::TextEnd { id });
        }
        for (id, _) in std::mem::take(&mut self.open_reasoning) {
            out.push(StreamPart::ReasoningEnd { id, mode: self.mode });
        }

        for id in std::mem::take(&mut self.tool_order) {
            let Some(buf) = self.tool_bufs.remove(&id) else { continue };
            let input = parse_arguments(&id, &buf.name, &buf.args);
            self.parts.push(AssistantPart::ToolCall {
                id: id.clone(),
                name: buf.name.clone(),
                input: input.clone(),
            });
            out.push(StreamPart::ToolInputEnd { key: id.clone(), name: buf.name.clone() });
            out.push(StreamPart::ToolCall { key: id, name: buf.name, input });
        }

        out
    }

    /// Finalize the step.
    pub fn finish(self) -> StepOutcome {
        let message = Message::Assistant { parts: self.parts };
        let tool_calls = message.tool_calls();
        let reason = if self.failed.is_some() {
            StopReason::Error
        } else if tool_calls.is_empty() {
            StopReason::Stop
        } else {
            StopReason::ToolCalls
        };
        StepOutcome { message, tool_calls, usage: self.usage, reason, failure: self.failed }
    }
}

/// Parse accumulated tool arguments, defaulting to an empty object.
///
/// Some models emit empty argument strings for zero-parameter tools.
fn parse_arguments(id: &str, name: &str, args: &str) -> Value {
    if args.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(args) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                call_id = %id,
                tool = %name,
                error = %e,
                "tool call arguments are not valid JSON; defaulting to empty object"
            );
            Value::Object(Default::default())
        }
    }
}
