//! The runtime adapter — one bounded step loop over a provider stream.
//!
//! Each step: open the provider stream, normalize raw events into
//! canonical parts, aggregate the assistant message, then dispatch any
//! tool calls and loop. The abort token is checked at every suspension
//! point; `on_abort` fires exactly once and is mutually exclusive with
//! `on_error`.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use serde_json::Value;
use tracing::Instrument;

use cw_domain::config::SessionConfig;
use cw_domain::error::{Error, ErrorCode, ErrorSource, Result};
use cw_domain::message::Message;
use cw_domain::stream::{StopReason, StreamPart, Usage};
use cw_domain::tool::ContentBlock;
use cw_providers::credentials::CredentialMaterial;
use cw_providers::redact::redacted;
use cw_providers::{Normalizer, ProviderStream, StreamFailure, StreamRequest};

use crate::dispatch::{DispatchOutcome, ToolContext, ToolDispatcher};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StreamSink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type PartFn = Box<dyn Fn(StreamPart) + Send + Sync>;
type AbortFn = Box<dyn Fn() + Send + Sync>;
type ErrorFn = Box<dyn Fn(&Error) + Send + Sync>;

/// The adapter's callback surface. All three callbacks are always
/// present; construction injects no-op defaults.
pub struct StreamSink {
    on_stream_part: PartFn,
    on_abort: AbortFn,
    on_error: ErrorFn,
    abort_fired: AtomicBool,
    error_fired: AtomicBool,
}

impl Default for StreamSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSink {
    pub fn new() -> Self {
        Self {
            on_stream_part: Box::new(|_| {}),
            on_abort: Box::new(|| {}),
            on_error: Box::new(|_| {}),
            abort_fired: AtomicBool::new(false),
            error_fired: AtomicBool::new(false),
        }
    }

    pub fn with_part_handler(mut self, f: impl Fn(StreamPart) + Send + Sync + 'static) -> Self {
        self.on_stream_part = Box::new(f);
        self
    }

    pub fn with_abort_handler(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_abort = Box::new(f);
        self
    }

    pub fn with_error_handler(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }

    pub fn part(&self, part: StreamPart) {
        (self.on_stream_part)(part);
    }

    /// Fire `on_abort` at most once, never after `on_error`.
    fn abort_once(&self) {
        if self.error_fired.load(Ordering::SeqCst) {
            return;
        }
        if !self.abort_fired.swap(true, Ordering::SeqCst) {
            (self.on_abort)();
        }
    }

    /// Fire `on_error` at most once, never after `on_abort`.
    fn error_once(&self, err: &Error) {
        if self.abort_fired.load(Ordering::SeqCst) {
            return;
        }
        if !self.error_fired.swap(true, Ordering::SeqCst) {
            (self.on_error)(err);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable step state threaded through the loop.
pub struct TurnState {
    pub messages: Vec<Message>,
    pub provider_options: Value,
    pub stream_options: Value,
}

/// Overrides returned by the `prepare_step` hook.
#[derive(Default)]
pub struct StepOverrides {
    pub messages: Option<Vec<Message>>,
    pub provider_options: Option<Value>,
    pub stream_options: Option<Value>,
}

/// Per-step hook: replace messages, merge provider/stream options.
pub type PrepareStep = Box<dyn FnMut(u32, &[Message]) -> Option<StepOverrides> + Send>;

/// What a whole turn produced.
pub struct TurnOutput {
    /// Text of the final assistant message.
    pub text: String,
    /// Reasoning of the final assistant message, if any.
    pub reasoning: Option<(String, cw_domain::message::ReasoningMode)>,
    /// Every message appended during the turn, in order.
    pub response_messages: Vec<Message>,
    pub usage: Usage,
    pub reason: StopReason,
}

/// Telemetry knobs for the adapter.
#[derive(Default, Clone, Copy)]
pub struct TelemetryOptions {
    /// Deep-scan and log step inputs (redacted) at stream open.
    pub record_inputs: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RuntimeAdapter {
    provider: std::sync::Arc<dyn ProviderStream>,
    dispatcher: std::sync::Arc<ToolDispatcher>,
    telemetry: TelemetryOptions,
}

impl RuntimeAdapter {
    pub fn new(
        provider: std::sync::Arc<dyn ProviderStream>,
        dispatcher: std::sync::Arc<ToolDispatcher>,
        telemetry: TelemetryOptions,
    ) -> Self {
        Self { provider, dispatcher, telemetry }
    }

    /// Drive the bounded step loop for one turn.
    ///
    /// `on_step` receives the messages appended by each completed step,
    /// so the caller can persist them between steps (never mid-stream).
    pub async fn run(
        &self,
        config: &SessionConfig,
        mut state: TurnState,
        credentials: &CredentialMaterial,
        ctx: &ToolContext,
        sink: &StreamSink,
        mut prepare_step: Option<PrepareStep>,
        mut on_step: impl FnMut(&[Message]),
    ) -> Result<TurnOutput> {
        let mut total_usage = Usage::default();
        let mut response_messages: Vec<Message> = Vec::new();
        let tools = self.dispatcher.tool_specs(config.enable_mcp).await;

        sink.part(StreamPart::Start);

        let max_steps = config.max_steps.max(1);
        for n in 1..=max_steps {
            if let Some(hook) = prepare_step.as_mut() {
                if let Some(overrides) = hook(n, &state.messages) {
                    if let Some(messages) = overrides.messages {
                        state.messages = messages;
                    }
                    if let Some(options) = overrides.provider_options {
                        merge_object(&mut state.provider_options, options);
                    }
                    if let Some(options) = overrides.stream_options {
                        merge_object(&mut state.stream_options, options);
                    }
                }
            }

            self.check_abort(ctx, sink)?;
            sink.part(StreamPart::StartStep { n });

            if self.telemetry.record_inputs {
                tracing::debug!(
                    step = n,
                    provider_options = %redacted(&state.provider_options),
                    stream_options = %redacted(&state.stream_options),
                    "opening model stream"
                );
            }

            let request = StreamRequest {
                model: config.model.clone(),
                system: config.system.clone(),
                messages: state.messages.clone(),
                tools: tools.clone(),
                provider_options: state.provider_options.clone(),
            };

            let span = tracing::info_span!("llm.call", step = n, model = %config.model);

            let mut stream = match self
                .provider
                .stream(request, credentials)
                .instrument(span.clone())
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    sink.error_once(&e);
                    return Err(e);
                }
            };

            let mut normalizer = Normalizer::new(self.provider.family());
            loop {
                // One suspension point per pulled event.
                let Some(event) = stream.next().instrument(span.clone()).await else { break };
                self.check_abort(ctx, sink)?;

                let raw = match event {
                    Ok(raw) => raw,
                    Err(e) => {
                        sink.error_once(&e);
                        return Err(e);
                    }
                };
                for part in normalizer.handle(raw) {
                    sink.part(part);
                }
            }
            drop(stream);

            let outcome = normalizer.finish();
            let step_usage = outcome.usage.unwrap_or_default();
            total_usage.add(&step_usage);
            sink.part(StreamPart::FinishStep { n, usage: step_usage, reason: outcome.reason });

            if outcome.reason == StopReason::Error {
                let err = failure_to_error(self.provider.provider_id(), outcome.failure);
                sink.error_once(&err);
                return Err(err);
            }
            self.check_abort(ctx, sink)?;

            // Fold the assistant message into the conversation.
            let assistant = outcome.message;
            state.messages.push(assistant.clone());
            let mut step_messages = vec![assistant.clone()];

            if outcome.tool_calls.is_empty() {
                sink.part(StreamPart::Finish { reason: StopReason::Stop, usage: total_usage });
                response_messages.extend(step_messages.iter().cloned());
                on_step(&step_messages);
                return Ok(finish_output(assistant, response_messages, total_usage, StopReason::Stop));
            }

            // Dispatch tool calls in the model's emission order.
            for call in &outcome.tool_calls {
                self.check_abort(ctx, sink)?;

                let span = tracing::info_span!("tool.call", tool = %call.name);
                let dispatched = self
                    .dispatcher
                    .execute(call, ctx, &|part| sink.part(part))
                    .instrument(span)
                    .await;

                let result_message = match dispatched {
                    DispatchOutcome::Completed(output) if !output.is_error => {
                        sink.part(StreamPart::ToolResult {
                            key: call.id.clone(),
                            name: call.name.clone(),
                            output: output.clone(),
                        });
                        Message::tool_result(&call.id, &call.name, output.content, false)
                    }
                    DispatchOutcome::Completed(output) => {
                        let error = output.error_message();
                        sink.part(StreamPart::ToolError {
                            key: call.id.clone(),
                            name: call.name.clone(),
                            error: error.clone(),
                        });
                        Message::tool_result(
                            &call.id,
                            &call.name,
                            vec![ContentBlock::text(error)],
                            true,
                        )
                    }
                    DispatchOutcome::Denied { reason } => {
                        sink.part(StreamPart::ToolOutputDenied {
                            key: call.id.clone(),
                            name: call.name.clone(),
                            reason: reason.clone(),
                        });
                        Message::tool_result(
                            &call.id,
                            &call.name,
                            vec![ContentBlock::text(reason)],
                            true,
                        )
                    }
                    DispatchOutcome::Aborted => {
                        return Err(self.abort_now(sink));
                    }
                };

                state.messages.push(result_message.clone());
                step_messages.push(result_message);
            }

            response_messages.extend(step_messages.iter().cloned());
            on_step(&step_messages);

            if n == max_steps {
                sink.part(StreamPart::Finish {
                    reason: StopReason::StepLimitReached,
                    usage: total_usage,
                });
                return Ok(finish_output(
                    assistant,
                    response_messages,
                    total_usage,
                    StopReason::StepLimitReached,
                ));
            }
        }

        unreachable!("step loop always returns within max_steps iterations")
    }

    fn check_abort(&self, ctx: &ToolContext, sink: &StreamSink) -> Result<()> {
        if ctx.abort.is_cancelled() {
            return Err(self.abort_now(sink));
        }
        Ok(())
    }

    fn abort_now(&self, sink: &StreamSink) -> Error {
        sink.part(StreamPart::Abort { reason: "cancelled".into() });
        sink.abort_once();
        Error::TurnAborted
    }
}

fn finish_output(
    final_assistant: Message,
    response_messages: Vec<Message>,
    usage: Usage,
    reason: StopReason,
) -> TurnOutput {
    let text = final_assistant.text();
    let reasoning = match &final_assistant {
        Message::Assistant { parts } => parts.iter().find_map(|p| match p {
            cw_domain::message::AssistantPart::Reasoning { text, kind } if !text.is_empty() => {
                Some((text.clone(), *kind))
            }
            _ => None,
        }),
        _ => None,
    };
    TurnOutput { text, reasoning, response_messages, usage, reason }
}

/// Map an upstream failure onto the error taxonomy, preserving any wire
/// classification the provider supplied.
fn failure_to_error(provider: &str, failure: Option<StreamFailure>) -> Error {
    let Some(failure) = failure else {
        return Error::Provider { provider: provider.to_owned(), message: "stream failed".into() };
    };
    let code = failure
        .code
        .as_deref()
        .and_then(|c| serde_json::from_value::<ErrorCode>(Value::String(c.to_owned())).ok());
    let source = failure
        .source
        .as_deref()
        .and_then(|s| serde_json::from_value::<ErrorSource>(Value::String(s.to_owned())).ok());
    match (code, source) {
        (Some(code), Some(source)) => {
            Error::Surfaced { code, source, message: failure.message }
        }
        _ => Error::Provider { provider: provider.to_owned(), message: failure.message },
    }
}

/// Shallow-merge `overlay` into `base` when both are objects; otherwise
/// replace.
fn merge_object(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                base_map.insert(key, value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_object_shallow_merges() {
        let mut base = serde_json::json!({"a": 1, "b": {"x": 1}});
        merge_object(&mut base, serde_json::json!({"b": {"y": 2}, "c": 3}));
        assert_eq!(base, serde_json::json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }

    #[test]
    fn merge_object_replaces_non_objects() {
        let mut base = serde_json::json!({"a": 1});
        merge_object(&mut base, serde_json::json!(null));
        assert_eq!(base, serde_json::json!(null));
    }

    #[test]
    fn failure_mapping_preserves_classification() {
        let err = failure_to_error(
            "mock",
            Some(StreamFailure {
                message: "Blocked".into(),
                code: Some("permission_denied".into()),
                source: Some("permissions".into()),
            }),
        );
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(err.source_kind(), ErrorSource::Permissions);
    }

    #[test]
    fn failure_mapping_defaults_to_provider_error() {
        let err = failure_to_error(
            "mock",
            Some(StreamFailure { message: "boom".into(), code: None, source: None }),
        );
        assert_eq!(err.code(), ErrorCode::ProviderError);
    }

    #[test]
    fn sink_abort_and_error_are_mutually_exclusive() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let aborts = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let a = aborts.clone();
        let e = errors.clone();
        let sink = StreamSink::new()
            .with_abort_handler(move || {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .with_error_handler(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            });

        sink.abort_once();
        sink.abort_once();
        sink.error_once(&Error::TurnAborted);

        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }
}
