//! Turn orchestration — everything around one step loop.
//!
//! Builds the step state from the session transcript, wires the stream
//! sink into the event bus, appends to the transcript as steps complete,
//! and folds the outcome (or error) into wire events.

use std::sync::Arc;

use serde_json::json;
use tracing::Instrument;

use cw_domain::error::Error;
use cw_domain::message::Message;
use cw_domain::stream::{StopReason, StreamPart};
use cw_domain::wire::ServerEvent;
use cw_providers::credentials::CredentialResolver;
use cw_providers::ProviderStream;

use crate::dispatch::{ToolContext, ToolDispatcher};
use crate::session::Session;
use crate::state::ProviderFactory;
use crate::transcript::TranscriptStore;

use super::adapter::{
    PrepareStep, RuntimeAdapter, StreamSink, TelemetryOptions, TurnState,
};

/// Everything a turn needs beyond the session itself.
#[derive(Clone)]
pub struct TurnDeps {
    pub providers: Arc<dyn ProviderFactory>,
    pub credentials: Arc<CredentialResolver>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub transcripts: Arc<TranscriptStore>,
    pub telemetry: TelemetryOptions,
}

/// Run one user turn to completion. Emits all outcome events itself;
/// the caller only owns the running-state transition.
pub async fn run_turn(session: Arc<Session>, deps: TurnDeps, text: String) {
    let session_id = session.id.clone();
    let span = tracing::info_span!("turn", session_id = %session_id);

    async {
        let config = session.config_snapshot();

        // The user message lands in the transcript before the loop; the
        // busy/disposed gates have already passed.
        session.append_messages(&[Message::user(&text)], &deps.transcripts);
        session.emit(ServerEvent::UserMessage { text: text.clone() });

        let provider: Arc<dyn ProviderStream> = match deps.providers.provider_for(&config) {
            Ok(p) => p,
            Err(e) => {
                session.emit_error(&e);
                return;
            }
        };

        let credentials = match deps.credentials.resolve(&config.provider).await {
            Ok(c) => c,
            Err(e) => {
                // The session stays alive so the user can reconnect the
                // provider and retry.
                session.emit_error(&e);
                return;
            }
        };

        let ctx = ToolContext {
            session_id: session_id.clone(),
            working_dir: config.working_dir.clone(),
            human: session.human.clone(),
            todos: session.todos.clone(),
            emit: session.sink(),
            abort: session.abort_token(),
        };

        let emit_for_parts = session.sink();
        let sink = StreamSink::new()
            .with_part_handler(move |part| {
                // Tool lifecycle parts also surface as first-class wire
                // events; everything flows through as a stream chunk.
                match &part {
                    StreamPart::ToolCall { key, name, input } => {
                        emit_for_parts(ServerEvent::ToolCall {
                            key: key.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        });
                    }
                    StreamPart::ToolResult { key, name, output } => {
                        emit_for_parts(ServerEvent::ToolResult {
                            key: key.clone(),
                            name: name.clone(),
                            output: output.clone(),
                        });
                    }
                    _ => {}
                }
                emit_for_parts(ServerEvent::ModelStreamChunk { part });
            })
            .with_abort_handler({
                let session_id = session_id.clone();
                move || tracing::debug!(session_id = %session_id, "turn aborted")
            })
            .with_error_handler({
                let session_id = session_id.clone();
                move |e| tracing::warn!(session_id = %session_id, error = %e, "turn failed")
            });

        let state = TurnState {
            messages: session.transcript_snapshot(),
            provider_options: json!({}),
            stream_options: json!({}),
        };

        let adapter = RuntimeAdapter::new(provider, deps.dispatcher.clone(), deps.telemetry);
        let prepare_step: Option<PrepareStep> = None;

        let session_for_steps = session.clone();
        let transcripts = deps.transcripts.clone();
        let result = adapter
            .run(&config, state, &credentials, &ctx, &sink, prepare_step, |step_messages| {
                session_for_steps.append_messages(step_messages, &transcripts);
            })
            .await;

        match result {
            Ok(output) => {
                if let Some((text, kind)) = output.reasoning {
                    session.emit(ServerEvent::Reasoning { text, kind });
                }
                if !output.text.is_empty() {
                    session.emit(ServerEvent::AssistantMessage { text: output.text });
                }
                if output.reason == StopReason::StepLimitReached {
                    session.emit_error(&Error::StepLimitReached { steps: config.max_steps });
                }
            }
            Err(e) => {
                session.emit_error(&e);
            }
        }
    }
    .instrument(span)
    .await
}
