//! Per-thread session state machine.
//!
//! `idle → running → idle` on a normal turn; `running → disposed` (or
//! `idle → disposed`) on shutdown, and `disposed` is terminal: a message
//! sent afterwards yields `error{code: session_disposed}`. The `running`
//! bit is a one-bit exclusive lock — a concurrent send is rejected with
//! `busy` and does not touch the transcript.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use cw_domain::config::SessionConfig;
use cw_domain::error::Error;
use cw_domain::message::Message;
use cw_domain::wire::ServerEvent;

use crate::cancel::CancelToken;
use crate::human::HumanChannel;
use crate::runtime::turn::{self, TurnDeps};
use crate::state::EventSink;
use crate::todos::TodoState;
use crate::transcript::TranscriptStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Idle,
    Running,
    Disposed,
}

pub struct Session {
    pub id: String,
    config: RwLock<SessionConfig>,
    state: Mutex<RuntimeState>,
    transcript: RwLock<Vec<Message>>,
    pub human: Arc<HumanChannel>,
    pub todos: Arc<TodoState>,
    abort: Mutex<CancelToken>,
    emit: EventSink,
}

impl Session {
    pub fn new(id: String, config: SessionConfig, emit: EventSink) -> Arc<Self> {
        let human = Arc::new(HumanChannel::new(emit.clone(), config.yolo));
        Arc::new(Self {
            id,
            config: RwLock::new(config),
            state: Mutex::new(RuntimeState::Idle),
            transcript: RwLock::new(Vec::new()),
            human,
            todos: Arc::new(TodoState::new()),
            abort: Mutex::new(CancelToken::new()),
            emit,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    pub fn config_snapshot(&self) -> SessionConfig {
        self.config.read().clone()
    }

    pub fn set_enable_mcp(&self, enable_mcp: bool) {
        self.config.write().enable_mcp = enable_mcp;
    }

    pub fn transcript_snapshot(&self) -> Vec<Message> {
        self.transcript.read().clone()
    }

    pub fn abort_token(&self) -> CancelToken {
        self.abort.lock().clone()
    }

    /// The publish closure handed to collaborators; never a back-pointer.
    pub fn sink(&self) -> EventSink {
        self.emit.clone()
    }

    pub fn emit(&self, event: ServerEvent) {
        (self.emit)(event);
    }

    pub fn emit_error(&self, err: &Error) {
        self.emit(ServerEvent::Error {
            message: err.to_string(),
            code: err.code(),
            source: err.source_kind(),
        });
    }

    // ── Transcript ────────────────────────────────────────────────

    /// Append messages in memory and to the on-disk store. Disposed
    /// sessions no longer mutate their transcript.
    pub(crate) fn append_messages(&self, messages: &[Message], store: &TranscriptStore) {
        if self.state() == RuntimeState::Disposed {
            return;
        }
        self.transcript.write().extend_from_slice(messages);
        if let Err(e) = store.append(&self.id, messages) {
            tracing::warn!(session_id = %self.id, error = %e, "transcript append failed");
        }
    }

    // ── Operations ────────────────────────────────────────────────

    /// Accept a user message: gate on the state machine, then spawn the
    /// turn. A send while running emits exactly one `busy` error and
    /// leaves the transcript untouched.
    pub fn send_user_message(self: &Arc<Self>, deps: TurnDeps, text: String) {
        {
            let mut state = self.state.lock();
            match *state {
                RuntimeState::Disposed => {
                    drop(state);
                    self.emit_error(&Error::SessionDisposed("session disposed".into()));
                    return;
                }
                RuntimeState::Running => {
                    drop(state);
                    self.emit_error(&Error::Busy);
                    return;
                }
                RuntimeState::Idle => {
                    *state = RuntimeState::Running;
                }
            }
        }

        *self.abort.lock() = CancelToken::new();

        let session = self.clone();
        tokio::spawn(async move {
            turn::run_turn(session.clone(), deps, text).await;

            // Release the running lock unless disposal won the race.
            let mut state = session.state.lock();
            if *state == RuntimeState::Running {
                *state = RuntimeState::Idle;
            }
        });
    }

    /// Cancel the current turn, if any.
    pub fn cancel(&self) {
        self.abort.lock().cancel();
    }

    /// Resolve a pending ask request.
    pub fn resolve_ask(&self, request_id: &str, answer: String) {
        self.human.resolve_ask(request_id, answer);
    }

    /// Resolve a pending approval request.
    pub fn resolve_approval(&self, request_id: &str, approved: bool) {
        self.human.resolve_approval(request_id, approved);
    }

    /// Clear transcript and todos; emits the empty `todos` snapshot.
    pub fn reset(&self, store: &TranscriptStore) {
        if self.state() == RuntimeState::Running {
            self.emit_error(&Error::Busy);
            return;
        }
        self.transcript.write().clear();
        if let Err(e) = store.clear(&self.id) {
            tracing::warn!(session_id = %self.id, error = %e, "transcript clear failed");
        }
        self.todos.clear();
        self.emit(ServerEvent::Todos { todos: Vec::new() });
    }

    /// Dispose the session: cancel the turn, reject every outstanding
    /// human request, and make the state terminal.
    pub fn dispose(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state == RuntimeState::Disposed {
                return;
            }
            *state = RuntimeState::Disposed;
        }
        self.abort.lock().cancel();
        self.human.dispose_all(reason);
        tracing::info!(session_id = %self.id, reason, "session disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_log() -> (Arc<Session>, Arc<Mutex<Vec<ServerEvent>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let emit: EventSink = Arc::new(move |ev| log2.lock().push(ev));
        (Session::new("s-1".into(), SessionConfig::default(), emit), log)
    }

    #[test]
    fn new_session_is_idle() {
        let (session, _log) = session_with_log();
        assert_eq!(session.state(), RuntimeState::Idle);
    }

    #[test]
    fn dispose_is_terminal_and_idempotent() {
        let (session, _log) = session_with_log();
        session.dispose("client disconnected");
        assert_eq!(session.state(), RuntimeState::Disposed);
        session.dispose("again");
        assert_eq!(session.state(), RuntimeState::Disposed);
    }

    #[tokio::test]
    async fn reset_clears_transcript_and_emits_empty_todos() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(tmp.path());
        let (session, log) = session_with_log();

        session.append_messages(&[Message::user("hi")], &store);
        assert_eq!(session.transcript_snapshot().len(), 1);

        session.reset(&store);
        assert!(session.transcript_snapshot().is_empty());
        assert!(store.read("s-1").unwrap().is_empty());
        assert!(matches!(
            log.lock().last(),
            Some(ServerEvent::Todos { todos }) if todos.is_empty()
        ));
    }

    #[tokio::test]
    async fn disposed_session_stops_appending() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(tmp.path());
        let (session, _log) = session_with_log();

        session.dispose("done");
        session.append_messages(&[Message::user("late")], &store);
        assert!(session.transcript_snapshot().is_empty());
    }
}
