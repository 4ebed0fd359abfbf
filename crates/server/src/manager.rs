//! The session manager: session lifecycle and inbound message routing.
//!
//! The manager owns the bus and the sessions; sessions publish through a
//! closure over the bus, never a back-pointer. Disposal on disconnect
//! rejects outstanding human requests and closes the session's bus
//! subscriptions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use cw_domain::wire::{ClientMessage, LogLevel, ServerEvent, PROTOCOL_VERSION};

use crate::builtins;
use crate::bus::Subscription;
use crate::dispatch::ToolDispatcher;
use crate::runtime::adapter::TelemetryOptions;
use crate::runtime::turn::TurnDeps;
use crate::session::Session;
use crate::state::{EventSink, ServerState};

pub struct SessionManager {
    state: ServerState,
    dispatcher: Arc<ToolDispatcher>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    /// Sessions currently holding an MCP registry reference.
    mcp_holders: Mutex<HashSet<String>>,
}

impl SessionManager {
    pub fn new(state: ServerState) -> Arc<Self> {
        let dispatcher = Arc::new(ToolDispatcher::new(Some(state.mcp.clone())));
        builtins::register_builtins(&dispatcher);
        Arc::new(Self {
            state,
            dispatcher,
            sessions: Mutex::new(HashMap::new()),
            mcp_holders: Mutex::new(HashSet::new()),
        })
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    fn turn_deps(&self) -> TurnDeps {
        TurnDeps {
            providers: self.state.providers.clone(),
            credentials: self.state.credentials.clone(),
            dispatcher: self.dispatcher.clone(),
            transcripts: self.state.transcripts.clone(),
            telemetry: TelemetryOptions::default(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Create a session for a new connection: subscribe first so the
    /// client sees `server_hello`, then announce it.
    pub async fn open_session(&self) -> (Arc<Session>, Subscription) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let subscription = self.state.bus.subscribe(&session_id);

        let bus = self.state.bus.clone();
        let id_for_sink = session_id.clone();
        let sink: EventSink = Arc::new(move |event| bus.publish(&id_for_sink, event));

        let config = self.state.session_defaults.clone();
        let session = Session::new(session_id.clone(), config.clone(), sink);
        self.sessions.lock().insert(session_id.clone(), session.clone());

        if config.enable_mcp {
            self.acquire_mcp(&session_id).await;
        }

        session.emit(ServerEvent::ServerHello {
            protocol_version: PROTOCOL_VERSION,
            config,
        });
        tracing::info!(session_id = %session_id, "session opened");
        (session, subscription)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Dispose a session and tear down its resources.
    pub async fn close_session(&self, session_id: &str) {
        let session = self.sessions.lock().remove(session_id);
        if let Some(session) = session {
            session.dispose("client disconnected");
        }
        self.state.bus.close_session(session_id);
        self.release_mcp(session_id).await;
    }

    /// Dispose everything (process shutdown). MCP transports close in
    /// reverse open order via the registry.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.dispose("server shutting down");
            self.state.bus.close_session(&session.id);
        }
        self.state.mcp.shutdown().await;
    }

    async fn acquire_mcp(&self, session_id: &str) {
        if self.mcp_holders.lock().insert(session_id.to_owned()) {
            if let Err(e) = self.state.mcp.acquire().await {
                tracing::warn!(session_id, error = %e, "MCP acquire failed");
                self.state.bus.publish(
                    session_id,
                    ServerEvent::Log {
                        level: LogLevel::Warn,
                        message: format!("MCP servers unavailable: {e}"),
                    },
                );
                self.mcp_holders.lock().remove(session_id);
            }
        }
    }

    async fn release_mcp(&self, session_id: &str) {
        if self.mcp_holders.lock().remove(session_id) {
            self.state.mcp.release().await;
        }
    }

    // ── Routing ───────────────────────────────────────────────────

    /// Route one inbound client message to its session.
    pub async fn handle_message(&self, session: &Arc<Session>, message: ClientMessage) {
        match message {
            ClientMessage::UserMessage { text, client_message_id: _ } => {
                session.send_user_message(self.turn_deps(), text);
            }
            ClientMessage::AskResponse { request_id, answer } => {
                session.resolve_ask(&request_id, answer);
            }
            ClientMessage::ApprovalResponse { request_id, approved } => {
                session.resolve_approval(&request_id, approved);
            }
            ClientMessage::Cancel => {
                session.cancel();
            }
            ClientMessage::Reset => {
                session.reset(&self.state.transcripts);
            }
            ClientMessage::SetEnableMcp { enable_mcp } => {
                session.set_enable_mcp(enable_mcp);
                if enable_mcp {
                    self.acquire_mcp(&session.id).await;
                } else {
                    self.release_mcp(&session.id).await;
                }
                let config = session.config_snapshot();
                session.emit(ServerEvent::SessionSettings {
                    enable_mcp: config.enable_mcp,
                    yolo: config.yolo,
                });
            }
            ClientMessage::McpServersGet => {
                session.emit(ServerEvent::McpServers {
                    servers: self.state.mcp.document().servers,
                });
            }
            ClientMessage::McpServerUpsert { server, previous_name } => {
                let doc = self.state.mcp.upsert(server, previous_name.as_deref());
                session.emit(ServerEvent::McpServers { servers: doc.servers });
            }
            ClientMessage::McpServerDelete { name } => {
                let (_existed, doc) = self.state.mcp.remove(&name);
                session.emit(ServerEvent::McpServers { servers: doc.servers });
            }
            ClientMessage::ConnectProvider { provider, api_key, auth_flow } => {
                match crate::providers_rpc::connect_provider(
                    &self.state.credentials,
                    &provider,
                    api_key,
                    auth_flow,
                ) {
                    Ok(event) => session.emit(event),
                    Err(e) => session.emit_error(&e),
                }
            }
            ClientMessage::ProviderCatalogGet => {
                session.emit(crate::providers_rpc::catalog_event());
            }
            ClientMessage::ProviderAuthMethodsGet { provider } => {
                session.emit(crate::providers_rpc::auth_methods_event(&provider));
            }
            ClientMessage::RefreshProviderStatus => {
                session.emit(crate::providers_rpc::status_event(&self.state.credentials));
            }
        }
    }
}
