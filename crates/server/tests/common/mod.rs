//! Shared test harness: an in-process manager wired to a scripted
//! provider, with stored API-key credentials so turns resolve.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{timeout, Duration};

use cw_domain::config::{McpDocument, ServerConfig, SessionConfig};
use cw_domain::error::Result;
use cw_domain::wire::{ServerEvent, ServerFrame};
use cw_mcp_client::McpRegistry;
use cw_providers::credentials::{
    CredentialDocument, CredentialMaterial, CredentialResolver, CredentialStore,
    HttpTokenRefresher,
};
use cw_providers::{BoxStream, ProviderFamily, ProviderStream, RawProviderEvent, StreamRequest};
use cw_server::bus::{EventBus, Subscription};
use cw_server::manager::SessionManager;
use cw_server::session::Session;
use cw_server::state::{ProviderFactory, ServerState};
use cw_server::transcript::TranscriptStore;

/// One step's worth of scripted raw events, with an optional delay
/// before each event (for mid-stream cancellation tests).
pub struct ScriptedStep {
    pub events: Vec<RawProviderEvent>,
    pub delay_per_event: Duration,
}

impl ScriptedStep {
    pub fn new(events: Vec<RawProviderEvent>) -> Self {
        Self { events, delay_per_event: Duration::ZERO }
    }

    pub fn slow(events: Vec<RawProviderEvent>, delay: Duration) -> Self {
        Self { events, delay_per_event: delay }
    }
}

/// Provider that replays scripted steps in order.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptedStep>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptedStep>) -> Arc<Self> {
        Arc::new(Self { steps: Mutex::new(steps.into()) })
    }
}

#[async_trait::async_trait]
impl ProviderStream for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAi
    }

    async fn stream(
        &self,
        _req: StreamRequest,
        _credentials: &CredentialMaterial,
    ) -> Result<BoxStream<'static, Result<RawProviderEvent>>> {
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedStep::new(vec![RawProviderEvent::Completed { usage: None }]));
        let stream = async_stream::stream! {
            for event in step.events {
                if step.delay_per_event > Duration::ZERO {
                    tokio::time::sleep(step.delay_per_event).await;
                }
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }
}

struct FixedFactory {
    provider: Arc<ScriptedProvider>,
}

impl ProviderFactory for FixedFactory {
    fn provider_for(&self, _config: &SessionConfig) -> Result<Arc<dyn ProviderStream>> {
        Ok(self.provider.clone())
    }
}

/// A manager + open session backed by the scripted provider.
pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub session: Arc<Session>,
    pub subscription: Subscription,
    _tmp: tempfile::TempDir,
}

pub async fn harness(provider: Arc<ScriptedProvider>, yolo: bool) -> Harness {
    harness_with(provider, yolo, |defaults| defaults).await
}

pub async fn harness_with(
    provider: Arc<ScriptedProvider>,
    yolo: bool,
    tune: impl FnOnce(SessionConfig) -> SessionConfig,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let credentials = CredentialResolver::new(
        CredentialStore::new(tmp.path().join("credentials")),
        Arc::new(HttpTokenRefresher::new().unwrap()),
    );
    credentials
        .store()
        .save("openai", &CredentialDocument::api_key("sk-test"))
        .unwrap();

    let defaults = tune(SessionConfig {
        working_dir: tmp.path().to_path_buf(),
        output_dir: tmp.path().join(".coworker"),
        yolo,
        ..SessionConfig::default()
    });

    let state = ServerState {
        config: Arc::new(ServerConfig::default()),
        session_defaults: defaults,
        bus: Arc::new(EventBus::new()),
        credentials: Arc::new(credentials),
        mcp: Arc::new(McpRegistry::new(McpDocument::default())),
        providers: Arc::new(FixedFactory { provider }),
        transcripts: Arc::new(TranscriptStore::new(tmp.path().join("transcripts"))),
    };

    let manager = SessionManager::new(state);
    let (session, subscription) = manager.open_session().await;
    Harness { manager, session, subscription, _tmp: tmp }
}

impl Harness {
    pub fn workspace(&self) -> &std::path::Path {
        self._tmp.path()
    }

    /// Next frame, bounded by a generous test timeout.
    pub async fn next_frame(&mut self) -> ServerFrame {
        timeout(Duration::from_secs(5), self.subscription.rx.recv())
            .await
            .expect("timed out waiting for a server frame")
            .expect("bus closed unexpectedly")
    }

    /// Drain frames until `pred` matches, returning the full prefix
    /// including the match.
    pub async fn frames_until(
        &mut self,
        mut pred: impl FnMut(&ServerEvent) -> bool,
    ) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.next_frame().await;
            let done = pred(&frame.event);
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }
}

// ── Script vocabulary helpers ─────────────────────────────────────

pub fn text_step(id: &str, text: &str) -> ScriptedStep {
    ScriptedStep::new(vec![
        RawProviderEvent::Created,
        RawProviderEvent::OutputTextDelta { id: id.into(), delta: text.into() },
        RawProviderEvent::OutputTextDone { id: id.into() },
        RawProviderEvent::Completed { usage: None },
    ])
}

pub fn tool_call_step(key: &str, name: &str, arguments: serde_json::Value) -> ScriptedStep {
    ScriptedStep::new(vec![
        RawProviderEvent::Created,
        RawProviderEvent::FunctionCallStart { id: key.into(), name: name.into() },
        RawProviderEvent::FunctionCallArgumentsDelta {
            id: key.into(),
            delta: arguments.to_string(),
        },
        RawProviderEvent::FunctionCallDone {
            id: key.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        },
        RawProviderEvent::Completed { usage: None },
    ])
}
