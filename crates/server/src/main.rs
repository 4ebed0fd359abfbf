use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use cw_domain::config::{ServerConfig, SessionConfig};
use cw_domain::wire::{ClientMessage, ServerEvent};

use cw_server::cli::Args;
use cw_server::manager::SessionManager;
use cw_server::state::ServerState;
use cw_server::{trace, ws};

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help/version exit 0; real argument errors exit 1.
            if e.use_stderr() {
                eprintln!("{e}");
                return ExitCode::from(1);
            }
            print!("{e}");
            return ExitCode::SUCCESS;
        }
    };

    trace::init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let working_dir = match &args.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let config = load_config(&working_dir)?;
    let mut session_defaults = SessionConfig {
        working_dir: working_dir.clone(),
        output_dir: working_dir.join(".coworker"),
        yolo: args.yolo,
        ..SessionConfig::default()
    };
    if let Some(provider) = &config.session.provider {
        session_defaults.provider = provider.clone();
    }
    if let Some(model) = &config.session.model {
        session_defaults.model = model.clone();
    }
    if let Some(system) = &config.session.system {
        session_defaults.system = system.clone();
    }
    if let Some(max_steps) = config.session.max_steps {
        session_defaults.max_steps = max_steps;
    }

    let state = ServerState::from_config(config, session_defaults)?;
    let manager = SessionManager::new(state);

    if args.cli {
        return run_repl(manager).await;
    }

    let addr = format!(
        "{}:{}",
        manager.state().config.host,
        manager.state().config.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "coworker listening");

    let app = ws::router(manager.clone());
    let shutdown_manager = manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_manager.shutdown().await;
        })
        .await?;
    Ok(())
}

fn load_config(dir: &PathBuf) -> anyhow::Result<ServerConfig> {
    let path = dir.join("coworker.toml");
    if !path.exists() {
        return Ok(ServerConfig::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(toml::from_str(&raw)?)
}

/// Minimal line-based terminal mode: one in-process session, events
/// printed as they arrive, `y`/`n` answers pending approvals.
async fn run_repl(manager: Arc<SessionManager>) -> anyhow::Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let (session, mut subscription) = manager.open_session().await;
    let pending: Arc<parking_lot::Mutex<Option<PendingPrompt>>> =
        Arc::new(parking_lot::Mutex::new(None));

    let printer_pending = pending.clone();
    tokio::spawn(async move {
        while let Some(frame) = subscription.rx.recv().await {
            match frame.event {
                ServerEvent::AssistantMessage { text } => println!("{text}"),
                ServerEvent::Reasoning { text, .. } => println!("[thinking] {text}"),
                ServerEvent::ToolCall { name, input, .. } => {
                    println!("[tool] {name} {input}");
                }
                ServerEvent::Ask { request_id, question } => {
                    println!("[ask] {question}");
                    *printer_pending.lock() = Some(PendingPrompt::Ask(request_id));
                }
                ServerEvent::Approval { request_id, command, dangerous, .. } => {
                    println!(
                        "[approval{}] {command} — approve? (y/N)",
                        if dangerous { ", dangerous" } else { "" }
                    );
                    *printer_pending.lock() = Some(PendingPrompt::Approval(request_id));
                }
                ServerEvent::Error { message, code, .. } => {
                    eprintln!("[error {:?}] {message}", code);
                }
                ServerEvent::Todos { todos } => {
                    for todo in &todos {
                        println!("[todo] [{}] {}", if todo.done { "x" } else { " " }, todo.text);
                    }
                }
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_owned();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let prompt = pending.lock().take();
        let message = match prompt {
            Some(PendingPrompt::Ask(request_id)) => {
                ClientMessage::AskResponse { request_id, answer: line }
            }
            Some(PendingPrompt::Approval(request_id)) => ClientMessage::ApprovalResponse {
                request_id,
                approved: line.eq_ignore_ascii_case("y") || line.eq_ignore_ascii_case("yes"),
            },
            None => ClientMessage::UserMessage { text: line, client_message_id: None },
        };
        manager.handle_message(&session, message).await;
    }

    manager.close_session(&session.id).await;
    manager.shutdown().await;
    Ok(())
}

enum PendingPrompt {
    Ask(String),
    Approval(String),
}
