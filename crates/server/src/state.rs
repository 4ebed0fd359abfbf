//! Shared server state.

use std::sync::Arc;

use cw_domain::config::{ServerConfig, SessionConfig};
use cw_domain::error::{Error, Result};
use cw_domain::wire::ServerEvent;
use cw_mcp_client::McpRegistry;
use cw_providers::catalog;
use cw_providers::credentials::{CredentialResolver, CredentialStore, HttpTokenRefresher};
use cw_providers::openai::OpenAiProvider;
use cw_providers::ProviderStream;

/// How a session publishes events: a closure into the bus, never a
/// back-pointer to the manager.
pub type EventSink = Arc<dyn Fn(ServerEvent) + Send + Sync>;

/// Creates provider adapters for sessions; tests substitute scripted
/// providers here.
pub trait ProviderFactory: Send + Sync {
    fn provider_for(&self, config: &SessionConfig) -> Result<Arc<dyn ProviderStream>>;
}

/// Default factory backed by the provider catalog.
pub struct CatalogProviderFactory;

impl ProviderFactory for CatalogProviderFactory {
    fn provider_for(&self, config: &SessionConfig) -> Result<Arc<dyn ProviderStream>> {
        if catalog::auth_methods(&config.provider).is_empty() {
            return Err(Error::Provider {
                provider: config.provider.clone(),
                message: "unknown provider".into(),
            });
        }
        // Every catalog provider currently speaks the responses dialect;
        // endpoints differ only in base URL and credentials.
        Ok(Arc::new(OpenAiProvider::new()?))
    }
}

/// Process-wide services shared by all sessions.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub session_defaults: SessionConfig,
    pub bus: Arc<crate::bus::EventBus>,
    pub credentials: Arc<CredentialResolver>,
    pub mcp: Arc<McpRegistry>,
    pub providers: Arc<dyn ProviderFactory>,
    pub transcripts: Arc<crate::transcript::TranscriptStore>,
}

impl ServerState {
    /// Assemble production state from config.
    pub fn from_config(config: ServerConfig, session_defaults: SessionConfig) -> Result<Self> {
        let credentials_dir = config
            .credentials_dir
            .clone()
            .unwrap_or_else(|| session_defaults.output_dir.join("credentials"));
        let transcripts_dir = session_defaults.output_dir.join("transcripts");

        Ok(Self {
            bus: Arc::new(crate::bus::EventBus::new()),
            credentials: Arc::new(CredentialResolver::new(
                CredentialStore::new(credentials_dir),
                Arc::new(HttpTokenRefresher::new()?),
            )),
            mcp: Arc::new(McpRegistry::new(config.mcp.clone())),
            providers: Arc::new(CatalogProviderFactory),
            transcripts: Arc::new(crate::transcript::TranscriptStore::new(transcripts_dir)),
            session_defaults,
            config: Arc::new(config),
        })
    }
}
