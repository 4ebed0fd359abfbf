//! End-to-end session scenarios against a scripted provider.

mod common;

use std::time::Duration;

use cw_domain::error::{ErrorCode, ErrorSource};
use cw_domain::message::Message;
use cw_domain::stream::StreamPart;
use cw_domain::wire::{ClientMessage, ServerEvent};
use cw_providers::RawProviderEvent;
use cw_server::session::RuntimeState;

use common::{harness, harness_with, text_step, tool_call_step, ScriptedProvider, ScriptedStep};

fn user_message(text: &str) -> ClientMessage {
    ClientMessage::UserMessage { text: text.into(), client_message_id: None }
}

/// Scenario 1 — happy turn: one user message, one streamed answer.
#[tokio::test]
async fn happy_turn() {
    let provider = ScriptedProvider::new(vec![text_step("m1", "hello")]);
    let mut h = harness(provider, false).await;

    let hello = h.next_frame().await;
    assert!(matches!(hello.event, ServerEvent::ServerHello { .. }));

    h.manager.handle_message(&h.session, user_message("hi")).await;

    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::AssistantMessage { .. }))
        .await;

    // user_message precedes assistant_message.
    let user_at = frames
        .iter()
        .position(|f| matches!(&f.event, ServerEvent::UserMessage { text } if text == "hi"))
        .expect("user_message event");
    let assistant_at = frames.len() - 1;
    assert!(user_at < assistant_at);
    match &frames[assistant_at].event {
        ServerEvent::AssistantMessage { text } => assert_eq!(text, "hello"),
        other => panic!("expected assistant_message, got {other:?}"),
    }

    // Transcript holds one user + one assistant message.
    let transcript = h.session.transcript_snapshot();
    assert_eq!(transcript.len(), 2);
    assert!(matches!(&transcript[0], Message::User { text } if text == "hi"));
    assert_eq!(transcript[1].text(), "hello");
}

/// Scenario 2 — tool loop of length two: bash call, result folded back,
/// final answer from step two.
#[tokio::test]
async fn tool_loop_of_length_two() {
    let provider = ScriptedProvider::new(vec![
        tool_call_step("tc-1", "bash", serde_json::json!({"command": "ls"})),
        text_step("m2", "found file.txt"),
    ]);
    let mut h = harness(provider, false).await;
    std::fs::write(h.workspace().join("file.txt"), "contents").unwrap();

    let _hello = h.next_frame().await;
    h.manager.handle_message(&h.session, user_message("what files are here?")).await;

    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::AssistantMessage { .. }))
        .await;

    // tool_call precedes tool_result for the same key, and the result
    // carries the command output.
    let call_at = frames
        .iter()
        .position(|f| matches!(&f.event, ServerEvent::ToolCall { key, name, .. }
            if key == "tc-1" && name == "bash"))
        .expect("tool_call event");
    let result_at = frames
        .iter()
        .position(|f| match &f.event {
            ServerEvent::ToolResult { key, output, .. } => {
                key == "tc-1"
                    && !output.is_error
                    && output.error_message().contains("file.txt")
            }
            _ => false,
        })
        .expect("tool_result event");
    assert!(call_at < result_at);

    match &frames.last().unwrap().event {
        ServerEvent::AssistantMessage { text } => assert_eq!(text, "found file.txt"),
        other => panic!("expected assistant_message, got {other:?}"),
    }

    // Transcript: user, assistant with tool call, tool_result, assistant.
    let transcript = h.session.transcript_snapshot();
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[1].tool_calls().len(), 1);
    assert!(matches!(&transcript[2], Message::ToolResult { is_error: false, .. }));
    assert_eq!(transcript[3].text(), "found file.txt");
}

/// Scenario 3 — approval denied: dangerous command gated, denial folds
/// back as a tool error and the model continues.
#[tokio::test]
async fn approval_denied() {
    let provider = ScriptedProvider::new(vec![
        tool_call_step("tc-1", "bash", serde_json::json!({"command": "rm -rf /"})),
        text_step("m2", "cancelled"),
    ]);
    let mut h = harness(provider, false).await;

    let _hello = h.next_frame().await;
    h.manager.handle_message(&h.session, user_message("clean up")).await;

    // Wait for the approval request.
    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::Approval { .. }))
        .await;
    let (request_id, dangerous) = match &frames.last().unwrap().event {
        ServerEvent::Approval { request_id, command, dangerous, .. } => {
            assert_eq!(command, "rm -rf /");
            (request_id.clone(), *dangerous)
        }
        other => panic!("expected approval, got {other:?}"),
    };
    assert!(dangerous);

    h.manager
        .handle_message(
            &h.session,
            ClientMessage::ApprovalResponse { request_id, approved: false },
        )
        .await;

    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::AssistantMessage { .. }))
        .await;

    // The denial surfaces on the stream.
    assert!(frames.iter().any(|f| matches!(
        &f.event,
        ServerEvent::ModelStreamChunk { part: StreamPart::ToolOutputDenied { key, reason, .. } }
            if key == "tc-1" && reason == "denied"
    )));
    match &frames.last().unwrap().event {
        ServerEvent::AssistantMessage { text } => assert_eq!(text, "cancelled"),
        other => panic!("expected assistant_message, got {other:?}"),
    }

    // The model saw a tool error with the denial text.
    let transcript = h.session.transcript_snapshot();
    match &transcript[2] {
        Message::ToolResult { is_error, content, .. } => {
            assert!(is_error);
            assert_eq!(content.len(), 1);
            match &content[0] {
                cw_domain::tool::ContentBlock::Text { text } => assert_eq!(text, "denied"),
            }
        }
        other => panic!("expected tool_result, got {other:?}"),
    }
}

/// Scenario 4 — abort mid-stream: cancel stops the turn, `turn_aborted`
/// is surfaced, the session returns to idle.
#[tokio::test]
async fn abort_mid_stream() {
    let mut events = vec![RawProviderEvent::Created];
    for n in 0..200 {
        events.push(RawProviderEvent::OutputTextDelta {
            id: "m1".into(),
            delta: format!("chunk{n} "),
        });
    }
    events.push(RawProviderEvent::Completed { usage: None });
    let provider = ScriptedProvider::new(vec![ScriptedStep::slow(
        events,
        Duration::from_millis(10),
    )]);
    let mut h = harness(provider, false).await;

    let _hello = h.next_frame().await;
    h.manager.handle_message(&h.session, user_message("talk forever")).await;

    // Let a few deltas through, then cancel.
    let _ = h
        .frames_until(|ev| {
            matches!(ev, ServerEvent::ModelStreamChunk { part: StreamPart::TextDelta { .. } })
        })
        .await;
    h.manager.handle_message(&h.session, ClientMessage::Cancel).await;

    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::Error { .. }))
        .await;
    match &frames.last().unwrap().event {
        ServerEvent::Error { code, source, .. } => {
            assert_eq!(*code, ErrorCode::TurnAborted);
            assert_eq!(*source, ErrorSource::Session);
        }
        other => panic!("expected error event, got {other:?}"),
    }
    // The abort also surfaced as a stream part.
    assert!(frames.iter().any(|f| matches!(
        &f.event,
        ServerEvent::ModelStreamChunk { part: StreamPart::Abort { .. } }
    )));

    // The session settles back to idle.
    for _ in 0..100 {
        if h.session.state() == RuntimeState::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session did not return to idle");
}

/// Scenario 6 — provider error classification passes through verbatim.
#[tokio::test]
async fn provider_error_preserves_code_and_source() {
    let provider = ScriptedProvider::new(vec![ScriptedStep::new(vec![
        RawProviderEvent::Created,
        RawProviderEvent::Failed {
            message: "Blocked".into(),
            code: Some("permission_denied".into()),
            source: Some("permissions".into()),
        },
    ])]);
    let mut h = harness(provider, false).await;

    let _hello = h.next_frame().await;
    h.manager.handle_message(&h.session, user_message("do the thing")).await;

    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::Error { .. }))
        .await;
    match &frames.last().unwrap().event {
        ServerEvent::Error { message, code, source } => {
            assert_eq!(message, "Blocked");
            assert_eq!(*code, ErrorCode::PermissionDenied);
            assert_eq!(*source, ErrorSource::Permissions);
        }
        other => panic!("expected error event, got {other:?}"),
    }
}

/// Busy boundary: a send while running yields exactly one `busy` error
/// and leaves the transcript untouched.
#[tokio::test]
async fn busy_while_running() {
    let provider = ScriptedProvider::new(vec![ScriptedStep::slow(
        vec![
            RawProviderEvent::Created,
            RawProviderEvent::OutputTextDelta { id: "m1".into(), delta: "slow".into() },
            RawProviderEvent::Completed { usage: None },
        ],
        Duration::from_millis(100),
    )]);
    let mut h = harness(provider, false).await;

    let _hello = h.next_frame().await;
    h.manager.handle_message(&h.session, user_message("first")).await;
    let _ = h
        .frames_until(|ev| matches!(ev, ServerEvent::UserMessage { .. }))
        .await;

    h.manager.handle_message(&h.session, user_message("second")).await;

    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::Error { .. }))
        .await;
    let busy_errors = frames
        .iter()
        .filter(|f| matches!(&f.event, ServerEvent::Error { code: ErrorCode::Busy, .. }))
        .count();
    assert_eq!(busy_errors, 1);

    // Only the first user message made it into the transcript.
    let user_count = h
        .session
        .transcript_snapshot()
        .iter()
        .filter(|m| matches!(m, Message::User { .. }))
        .count();
    assert_eq!(user_count, 1);
}

/// Dispose is terminal: a send afterwards yields `session_disposed`.
#[tokio::test]
async fn session_dispose_is_terminal() {
    let provider = ScriptedProvider::new(vec![]);
    let mut h = harness(provider, false).await;
    let _hello = h.next_frame().await;

    h.session.dispose("test shutdown");
    h.manager.handle_message(&h.session, user_message("anyone there?")).await;

    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::Error { .. }))
        .await;
    match &frames.last().unwrap().event {
        ServerEvent::Error { code, .. } => assert_eq!(*code, ErrorCode::SessionDisposed),
        other => panic!("expected error event, got {other:?}"),
    }
    assert!(h.session.transcript_snapshot().is_empty());
}

/// Step bound: start/finish step pairs never exceed max_steps, and the
/// limit surfaces as `step_limit_reached`.
#[tokio::test]
async fn step_limit_bounds_the_loop() {
    // Every step asks for another tool call; the loop must stop at 2.
    let provider = ScriptedProvider::new(vec![
        tool_call_step("tc-1", "list_dir", serde_json::json!({})),
        tool_call_step("tc-2", "list_dir", serde_json::json!({})),
        tool_call_step("tc-3", "list_dir", serde_json::json!({})),
    ]);
    let mut h = harness_with(provider, false, |mut defaults| {
        defaults.max_steps = 2;
        defaults
    })
    .await;

    let _hello = h.next_frame().await;
    h.manager.handle_message(&h.session, user_message("loop forever")).await;

    let frames = h
        .frames_until(|ev| {
            matches!(ev, ServerEvent::Error { code: ErrorCode::StepLimitReached, .. })
        })
        .await;

    let starts = frames
        .iter()
        .filter(|f| matches!(&f.event, ServerEvent::ModelStreamChunk { part: StreamPart::StartStep { .. } }))
        .count();
    let finishes = frames
        .iter()
        .filter(|f| matches!(&f.event, ServerEvent::ModelStreamChunk { part: StreamPart::FinishStep { .. } }))
        .count();
    assert_eq!(starts, 2);
    assert_eq!(finishes, 2);

    assert!(frames.iter().any(|f| matches!(
        &f.event,
        ServerEvent::ModelStreamChunk {
            part: StreamPart::Finish { reason: cw_domain::stream::StopReason::StepLimitReached, .. }
        }
    )));
}

/// Ask flow with the skip sentinel: the tool reports a skipped question.
#[tokio::test]
async fn ask_skip_token_renders_as_skipped() {
    let provider = ScriptedProvider::new(vec![
        tool_call_step("tc-1", "ask_human", serde_json::json!({"question": "which one?"})),
        text_step("m2", "done"),
    ]);
    let mut h = harness(provider, false).await;

    let _hello = h.next_frame().await;
    h.manager.handle_message(&h.session, user_message("pick something")).await;

    let frames = h.frames_until(|ev| matches!(ev, ServerEvent::Ask { .. })).await;
    let request_id = match &frames.last().unwrap().event {
        ServerEvent::Ask { request_id, question } => {
            assert_eq!(question, "which one?");
            request_id.clone()
        }
        other => panic!("expected ask, got {other:?}"),
    };

    h.manager
        .handle_message(
            &h.session,
            ClientMessage::AskResponse {
                request_id,
                answer: cw_domain::wire::ASK_SKIP_TOKEN.into(),
            },
        )
        .await;

    let _ = h
        .frames_until(|ev| matches!(ev, ServerEvent::AssistantMessage { .. }))
        .await;

    let transcript = h.session.transcript_snapshot();
    match &transcript[2] {
        Message::ToolResult { is_error, content, .. } => {
            assert!(!is_error);
            match &content[0] {
                cw_domain::tool::ContentBlock::Text { text } => {
                    assert_eq!(text, "(question skipped)");
                }
            }
        }
        other => panic!("expected tool_result, got {other:?}"),
    }
}

/// Missing credentials fail the turn but leave the session usable.
#[tokio::test]
async fn missing_credentials_fail_the_turn_only() {
    let provider = ScriptedProvider::new(vec![text_step("m1", "hi")]);
    let mut h = harness_with(provider, false, |mut defaults| {
        defaults.provider = "anthropic".into(); // no stored credentials
        defaults
    })
    .await;

    let _hello = h.next_frame().await;
    h.manager.handle_message(&h.session, user_message("hello?")).await;

    let frames = h
        .frames_until(|ev| matches!(ev, ServerEvent::Error { .. }))
        .await;
    match &frames.last().unwrap().event {
        ServerEvent::Error { code, source, .. } => {
            assert_eq!(*code, ErrorCode::CredentialsMissingOrExpired);
            assert_eq!(*source, ErrorSource::Provider);
        }
        other => panic!("expected error event, got {other:?}"),
    }

    for _ in 0..100 {
        if h.session.state() == RuntimeState::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session did not return to idle");
}
