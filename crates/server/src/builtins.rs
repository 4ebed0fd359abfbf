//! Built-in tool descriptors.
//!
//! Wires the `cw-tools` implementations into the dispatcher: shell
//! execution (gated by the danger classifier), workspace file I/O, the
//! session todo list, and the ask-human tool.

use std::sync::Arc;

use serde_json::json;

use cw_domain::error::Error;
use cw_domain::tool::ToolOutcome;
use cw_domain::wire::{ServerEvent, TodoItem, ASK_SKIP_TOKEN};
use cw_tools::{exec, fs_ops};

use crate::dispatch::{ApprovalPolicy, InputValidator, ToolDescriptor, ToolDispatcher};

/// Register every built-in tool.
pub fn register_builtins(dispatcher: &ToolDispatcher) {
    dispatcher.register(bash());
    dispatcher.register(read_file());
    dispatcher.register(write_file());
    dispatcher.register(list_dir());
    dispatcher.register(todo_write());
    dispatcher.register(ask_human());
}

fn bash() -> ToolDescriptor {
    ToolDescriptor {
        name: "bash".into(),
        description: Some("Run a shell command in the workspace. Returns combined output.".into()),
        validator: InputValidator::from_schema(json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "timeout_sec": { "type": "integer", "description": "Hard timeout in seconds" }
            },
            "required": ["command"]
        })),
        approval: ApprovalPolicy::ShellClassifier,
        timeout: None,
        execute: Arc::new(|input, ctx| {
            Box::pin(async move {
                let request: exec::ExecRequest =
                    serde_json::from_value(input).map_err(Error::Json)?;
                let result = exec::run(request, &ctx.working_dir).await.map_err(Error::Io)?;

                if result.timed_out {
                    return Ok(ToolOutcome::error(format!(
                        "command timed out\n{}",
                        result.output
                    )));
                }
                match result.exit_code {
                    Some(0) => Ok(ToolOutcome::text(result.output)),
                    code => Ok(ToolOutcome {
                        content: vec![cw_domain::tool::ContentBlock::text(format!(
                            "{}(exit code {})",
                            result.output,
                            code.map_or("unknown".to_string(), |c| c.to_string())
                        ))],
                        is_error: true,
                        details: None,
                    }),
                }
            })
        }),
    }
}

fn read_file() -> ToolDescriptor {
    ToolDescriptor {
        name: "read_file".into(),
        description: Some("Read a file inside the workspace.".into()),
        validator: InputValidator::from_schema(json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "offset": { "type": "integer", "description": "First line to return (0-based)" },
                "limit": { "type": "integer", "description": "Max lines to return" }
            },
            "required": ["path"]
        })),
        approval: ApprovalPolicy::Never,
        timeout: None,
        execute: Arc::new(|input, ctx| {
            Box::pin(async move {
                let path = input.get("path").and_then(|v| v.as_str()).unwrap_or_default();
                let offset = input.get("offset").and_then(|v| v.as_u64()).map(|n| n as usize);
                let limit = input.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);
                match fs_ops::read_file(&ctx.working_dir, path, offset, limit).await {
                    Ok(text) => Ok(ToolOutcome::text(text)),
                    Err(message) => Ok(ToolOutcome::error(message)),
                }
            })
        }),
    }
}

fn write_file() -> ToolDescriptor {
    ToolDescriptor {
        name: "write_file".into(),
        description: Some("Write a file inside the workspace, creating parents.".into()),
        validator: InputValidator::from_schema(json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })),
        approval: ApprovalPolicy::Never,
        timeout: None,
        execute: Arc::new(|input, ctx| {
            Box::pin(async move {
                let path = input.get("path").and_then(|v| v.as_str()).unwrap_or_default();
                let content = input.get("content").and_then(|v| v.as_str()).unwrap_or_default();
                match fs_ops::write_file(&ctx.working_dir, path, content).await {
                    Ok(()) => Ok(ToolOutcome::text(format!("wrote {path}"))),
                    Err(message) => Ok(ToolOutcome::error(message)),
                }
            })
        }),
    }
}

fn list_dir() -> ToolDescriptor {
    ToolDescriptor {
        name: "list_dir".into(),
        description: Some("List a directory inside the workspace.".into()),
        validator: InputValidator::from_schema(json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory, default '.'" }
            }
        })),
        approval: ApprovalPolicy::Never,
        timeout: None,
        execute: Arc::new(|input, ctx| {
            Box::pin(async move {
                let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
                match fs_ops::list_dir(&ctx.working_dir, path).await {
                    Ok(entries) => {
                        let listing = entries
                            .iter()
                            .map(|e| {
                                if e.is_dir {
                                    format!("{}/", e.name)
                                } else {
                                    format!("{} ({} bytes)", e.name, e.size)
                                }
                            })
                            .collect::<Vec<_>>()
                            .join("\n");
                        Ok(ToolOutcome::text(listing))
                    }
                    Err(message) => Ok(ToolOutcome::error(message)),
                }
            })
        }),
    }
}

fn todo_write() -> ToolDescriptor {
    ToolDescriptor {
        name: "todo_write".into(),
        description: Some("Replace the session todo list shown to the user.".into()),
        validator: InputValidator::from_schema(json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "done": { "type": "boolean" }
                        },
                        "required": ["text"]
                    }
                }
            },
            "required": ["todos"]
        })),
        approval: ApprovalPolicy::Never,
        timeout: None,
        execute: Arc::new(|input, ctx| {
            Box::pin(async move {
                let todos: Vec<TodoItem> =
                    serde_json::from_value(input.get("todos").cloned().unwrap_or_default())
                        .map_err(Error::Json)?;
                let count = todos.len();
                let snapshot = ctx.todos.replace(todos);
                (ctx.emit)(ServerEvent::Todos { todos: snapshot });
                Ok(ToolOutcome::text(format!("{count} todos recorded")))
            })
        }),
    }
}

fn ask_human() -> ToolDescriptor {
    ToolDescriptor {
        name: "ask_human".into(),
        description: Some("Ask the human a question and wait for their answer.".into()),
        validator: InputValidator::from_schema(json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" }
            },
            "required": ["question"]
        })),
        approval: ApprovalPolicy::Never,
        timeout: None,
        execute: Arc::new(|input, ctx| {
            Box::pin(async move {
                let question = input.get("question").and_then(|v| v.as_str()).unwrap_or_default();
                match ctx.human.ask(question).await {
                    Ok(answer) if answer == ASK_SKIP_TOKEN => {
                        Ok(ToolOutcome::text("(question skipped)"))
                    }
                    Ok(answer) => Ok(ToolOutcome::text(answer)),
                    // Disposal mid-ask cancels the turn rather than
                    // surfacing a tool error.
                    Err(_) => Err(Error::TurnAborted),
                }
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::dispatch::{DispatchOutcome, ToolContext};
    use crate::human::HumanChannel;
    use crate::state::EventSink;
    use crate::todos::TodoState;
    use cw_domain::tool::ToolCall;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    fn ctx_in(dir: PathBuf) -> (ToolContext, Arc<Mutex<Vec<ServerEvent>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let emit: EventSink = Arc::new(move |ev| log2.lock().push(ev));
        let ctx = ToolContext {
            session_id: "s".into(),
            working_dir: dir,
            human: Arc::new(HumanChannel::new(emit.clone(), true)),
            todos: Arc::new(TodoState::new()),
            emit,
            abort: CancelToken::new(),
        };
        (ctx, log)
    }

    fn dispatcher() -> ToolDispatcher {
        let d = ToolDispatcher::new(None);
        register_builtins(&d);
        d
    }

    fn call(name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall { id: "tc".into(), name: name.into(), input }
    }

    #[tokio::test]
    async fn bash_runs_and_reports_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, _log) = ctx_in(tmp.path().to_path_buf());
        let d = dispatcher();

        let ok = d.execute(&call("bash", json!({"command": "echo hi"})), &ctx, &|_| {}).await;
        match ok {
            DispatchOutcome::Completed(o) => {
                assert!(!o.is_error);
                assert_eq!(o.error_message().trim(), "hi");
            }
            other => panic!("expected success, got {other:?}"),
        }

        let fail = d.execute(&call("bash", json!({"command": "exit 2"})), &ctx, &|_| {}).await;
        match fail {
            DispatchOutcome::Completed(o) => {
                assert!(o.is_error);
                assert!(o.error_message().contains("exit code 2"));
            }
            other => panic!("expected error outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_tools_roundtrip_within_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, _log) = ctx_in(tmp.path().to_path_buf());
        let d = dispatcher();

        let write = d
            .execute(
                &call("write_file", json!({"path": "a.txt", "content": "hello"})),
                &ctx,
                &|_| {},
            )
            .await;
        assert!(matches!(write, DispatchOutcome::Completed(o) if !o.is_error));

        let read = d.execute(&call("read_file", json!({"path": "a.txt"})), &ctx, &|_| {}).await;
        match read {
            DispatchOutcome::Completed(o) => assert_eq!(o.error_message(), "hello"),
            other => panic!("expected content, got {other:?}"),
        }

        let escape = d
            .execute(&call("read_file", json!({"path": "../outside"})), &ctx, &|_| {})
            .await;
        assert!(matches!(escape, DispatchOutcome::Completed(o) if o.is_error));
    }

    #[tokio::test]
    async fn todo_write_replaces_and_emits() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, log) = ctx_in(tmp.path().to_path_buf());
        let d = dispatcher();

        let outcome = d
            .execute(
                &call("todo_write", json!({"todos": [{"text": "ship it", "done": false}]})),
                &ctx,
                &|_| {},
            )
            .await;
        assert!(matches!(outcome, DispatchOutcome::Completed(o) if !o.is_error));
        assert_eq!(ctx.todos.snapshot().len(), 1);
        assert!(log
            .lock()
            .iter()
            .any(|ev| matches!(ev, ServerEvent::Todos { todos } if todos.len() == 1)));
    }
}
