//! Process-level MCP server registry.
//!
//! One connection per configured server per process, shared by every
//! session. Consumers acquire/release the registry; the last release
//! closes transports in reverse open order. Connect failures retry per
//! the server's `retries` field with a 1s·attempt backoff.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use cw_domain::config::{McpDocument, McpServerConfig, McpTransportConfig};
use cw_domain::error::{Error, Result};

use crate::protocol::{self, CallResult, ServerTool, ToolsListResult};
use crate::transport::{HttpTransport, McpTransport, StdioTransport, TransportError};

type Connector = Box<
    dyn Fn(&McpServerConfig) -> BoxFuture<'static, std::result::Result<Arc<dyn McpTransport>, TransportError>>
        + Send
        + Sync,
>;

struct Connection {
    name: String,
    tools: Vec<ServerTool>,
    transport: Arc<dyn McpTransport>,
}

#[derive(Default)]
struct Inner {
    /// Open order; closed in reverse on last release.
    connections: Vec<Connection>,
    refs: usize,
}

/// Registry of MCP server connections, owned by the session manager.
pub struct McpRegistry {
    doc: parking_lot::RwLock<McpDocument>,
    inner: tokio::sync::Mutex<Inner>,
    connector: Connector,
}

impl McpRegistry {
    pub fn new(doc: McpDocument) -> Self {
        Self::with_connector(doc, Box::new(|config| {
            let config = config.clone();
            Box::pin(async move { default_connect(&config).await })
        }))
    }

    /// Inject the transport connector (tests substitute fakes here).
    pub fn with_connector(doc: McpDocument, connector: Connector) -> Self {
        Self {
            doc: parking_lot::RwLock::new(doc),
            inner: tokio::sync::Mutex::new(Inner::default()),
            connector,
        }
    }

    // ── Document operations ───────────────────────────────────────

    pub fn document(&self) -> McpDocument {
        self.doc.read().clone()
    }

    /// Insert or replace a server entry. `previous_name` handles renames.
    pub fn upsert(&self, server: McpServerConfig, previous_name: Option<&str>) -> McpDocument {
        let mut doc = self.doc.write();
        let replace = previous_name.unwrap_or(&server.name).to_owned();
        doc.servers.retain(|s| s.name != replace && s.name != server.name);
        doc.servers.push(server);
        doc.clone()
    }

    /// Remove a server entry. Returns whether it existed.
    pub fn remove(&self, name: &str) -> (bool, McpDocument) {
        let mut doc = self.doc.write();
        let before = doc.servers.len();
        doc.servers.retain(|s| s.name != name);
        (doc.servers.len() < before, doc.clone())
    }

    // ── Connection lifecycle ──────────────────────────────────────

    /// Register a consumer. The first acquire connects every configured
    /// server; later acquires only bump the reference count.
    pub async fn acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.refs += 1;
        if inner.refs > 1 {
            return Ok(());
        }

        let servers = self.doc.read().servers.clone();
        for config in servers {
            match self.connect_with_retries(&config).await {
                Ok(conn) => inner.connections.push(conn),
                Err(e) if config.required => {
                    // Roll back: close whatever opened, drop the ref.
                    for conn in inner.connections.drain(..).rev() {
                        conn.transport.shutdown().await;
                    }
                    inner.refs -= 1;
                    return Err(Error::Mcp(format!(
                        "required server {} failed to connect: {e}",
                        config.name
                    )));
                }
                Err(e) => {
                    tracing::warn!(server = %config.name, error = %e, "MCP server connect failed, skipping");
                }
            }
        }
        Ok(())
    }

    /// Drop a consumer. The last release closes transports LIFO.
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        inner.refs = inner.refs.saturating_sub(1);
        if inner.refs > 0 {
            return;
        }
        for conn in inner.connections.drain(..).rev() {
            tracing::info!(server = %conn.name, "closing MCP server");
            conn.transport.shutdown().await;
        }
    }

    async fn connect_with_retries(&self, config: &McpServerConfig) -> Result<Connection> {
        let attempts = config.retries.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.try_connect(config).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::warn!(
                        server = %config.name,
                        attempt,
                        error = %e,
                        "MCP connect attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Mcp("connect failed".into())))
    }

    async fn try_connect(&self, config: &McpServerConfig) -> Result<Connection> {
        let transport = (self.connector)(config)
            .await
            .map_err(|e| Error::Mcp(format!("{}: {e}", config.name)))?;

        transport
            .request("initialize", Some(protocol::initialize_params()))
            .await
            .map_err(|e| Error::Mcp(format!("{}: initialize failed: {e}", config.name)))?;
        transport
            .notify("notifications/initialized")
            .await
            .map_err(|e| Error::Mcp(format!("{}: initialized notification failed: {e}", config.name)))?;

        let tools = match transport.request("tools/list", None).await {
            Ok(result) => serde_json::from_value::<ToolsListResult>(result)
                .map(|r| r.tools)
                .unwrap_or_else(|e| {
                    tracing::warn!(server = %config.name, error = %e, "failed to parse tools/list result");
                    Vec::new()
                }),
            Err(e) => {
                tracing::warn!(server = %config.name, error = %e, "tools/list failed, server has no tools");
                Vec::new()
            }
        };

        tracing::info!(server = %config.name, tool_count = tools.len(), "MCP server connected");
        Ok(Connection { name: config.name.clone(), tools, transport })
    }

    // ── Tool access ───────────────────────────────────────────────

    /// All tools across connected servers, as `(scoped_name, tool)`.
    pub async fn tools(&self) -> Vec<(String, ServerTool)> {
        let inner = self.inner.lock().await;
        inner
            .connections
            .iter()
            .filter(|c| c.transport.is_alive())
            .flat_map(|c| {
                c.tools
                    .iter()
                    .map(|t| (protocol::scoped_tool_name(&c.name, &t.name), t.clone()))
            })
            .collect()
    }

    /// Invoke a tool on a connected server.
    pub async fn call(&self, server: &str, tool: &str, arguments: Value) -> Result<CallResult> {
        let transport = {
            let inner = self.inner.lock().await;
            inner
                .connections
                .iter()
                .find(|c| c.name == server)
                .map(|c| c.transport.clone())
                .ok_or_else(|| Error::Mcp(format!("server not connected: {server}")))?
        };
        if !transport.is_alive() {
            return Err(Error::Mcp(format!("server is down: {server}")));
        }

        let result = transport
            .request("tools/call", Some(protocol::call_params(tool, arguments)))
            .await
            .map_err(|e| Error::Mcp(format!("{server}: tools/call failed: {e}")))?;
        serde_json::from_value(result)
            .map_err(|e| Error::Mcp(format!("{server}: failed to parse tools/call result: {e}")))
    }

    /// Force-close every connection (process shutdown path).
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.refs = 0;
        for conn in inner.connections.drain(..).rev() {
            conn.transport.shutdown().await;
        }
    }
}

fn backoff(attempt: u32) -> tokio::time::Duration {
    tokio::time::Duration::from_secs(attempt as u64)
}

async fn default_connect(
    config: &McpServerConfig,
) -> std::result::Result<Arc<dyn McpTransport>, TransportError> {
    match &config.transport {
        McpTransportConfig::Stdio { command, args, env, cwd } => {
            let t = StdioTransport::spawn(command, args, env, cwd.as_deref())?;
            Ok(Arc::new(t))
        }
        McpTransportConfig::Http { url, headers } | McpTransportConfig::Sse { url, headers } => {
            let t = HttpTransport::connect(url, headers)?;
            Ok(Arc::new(t))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeTransport {
        name: String,
        shutdown_log: Arc<StdMutex<Vec<String>>>,
        fail_initialize: bool,
        alive: AtomicBool,
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn request(
            &self,
            method: &str,
            _params: Option<Value>,
        ) -> std::result::Result<Value, TransportError> {
            match method {
                "initialize" if self.fail_initialize => Err(TransportError::Timeout),
                "initialize" => Ok(serde_json::json!({"capabilities": {}})),
                "tools/list" => Ok(serde_json::json!({
                    "tools": [{"name": "echo", "description": "Echo input"}]
                })),
                "tools/call" => Ok(serde_json::json!({
                    "content": [{"type": "text", "text": "pong"}]
                })),
                other => panic!("unexpected method {other}"),
            }
        }

        async fn notify(&self, _method: &str) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn shutdown(&self) {
            self.alive.store(false, Ordering::SeqCst);
            self.shutdown_log.lock().unwrap().push(self.name.clone());
        }
    }

    fn server(name: &str, retries: u32) -> McpServerConfig {
        McpServerConfig {
            name: name.into(),
            transport: McpTransportConfig::Stdio {
                command: "unused".into(),
                args: vec![],
                env: Default::default(),
                cwd: None,
            },
            required: false,
            retries,
        }
    }

    fn registry_with_fakes(
        servers: Vec<McpServerConfig>,
        shutdown_log: Arc<StdMutex<Vec<String>>>,
        fail_attempts: Arc<AtomicUsize>,
    ) -> McpRegistry {
        McpRegistry::with_connector(
            McpDocument { servers },
            Box::new(move |config| {
                let name = config.name.clone();
                let log = shutdown_log.clone();
                let fail = fail_attempts.clone();
                Box::pin(async move {
                    let fail_initialize = fail
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            if n > 0 { Some(n - 1) } else { None }
                        })
                        .is_ok();
                    Ok(Arc::new(FakeTransport {
                        name,
                        shutdown_log: log,
                        fail_initialize,
                        alive: AtomicBool::new(true),
                    }) as Arc<dyn McpTransport>)
                })
            }),
        )
    }

    #[tokio::test]
    async fn acquire_discovers_scoped_tools() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registry = registry_with_fakes(
            vec![server("files", 1)],
            log.clone(),
            Arc::new(AtomicUsize::new(0)),
        );
        registry.acquire().await.unwrap();

        let tools = registry.tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].0, "mcp__files__echo");

        let result = registry.call("files", "echo", serde_json::json!({})).await.unwrap();
        assert_eq!(result.content[0].text, "pong");
    }

    #[tokio::test]
    async fn last_release_closes_in_reverse_open_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registry = registry_with_fakes(
            vec![server("a", 1), server("b", 1), server("c", 1)],
            log.clone(),
            Arc::new(AtomicUsize::new(0)),
        );

        registry.acquire().await.unwrap();
        registry.acquire().await.unwrap();

        registry.release().await;
        assert!(log.lock().unwrap().is_empty(), "still one consumer holding");

        registry.release().await;
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_with_backoff() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        // First two initialize attempts fail, third succeeds (retries = 3).
        let registry = registry_with_fakes(
            vec![server("flaky", 3)],
            log.clone(),
            Arc::new(AtomicUsize::new(2)),
        );

        registry.acquire().await.unwrap();
        assert_eq!(registry.tools().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn required_server_failure_is_fatal_and_rolls_back() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        // `ok` connects, then the required `broken` exhausts its attempt.
        let registry = {
            let log = log.clone();
            McpRegistry::with_connector(
                McpDocument { servers: vec![server("ok", 1), {
                    let mut s = server("broken", 1);
                    s.required = true;
                    s
                }] },
                Box::new(move |config| {
                    let name = config.name.clone();
                    let log = log.clone();
                    Box::pin(async move {
                        Ok(Arc::new(FakeTransport {
                            fail_initialize: name == "broken",
                            name,
                            shutdown_log: log,
                            alive: AtomicBool::new(true),
                        }) as Arc<dyn McpTransport>)
                    })
                }),
            )
        };

        let err = registry.acquire().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
        // The healthy connection opened first and was rolled back.
        assert_eq!(*log.lock().unwrap(), vec!["ok"]);
        assert!(registry.tools().await.is_empty());
    }

    #[test]
    fn upsert_handles_rename_and_delete() {
        let registry = McpRegistry::new(McpDocument { servers: vec![server("old", 1)] });

        let mut renamed = server("new", 2);
        renamed.retries = 2;
        let doc = registry.upsert(renamed, Some("old"));
        assert_eq!(doc.servers.len(), 1);
        assert_eq!(doc.servers[0].name, "new");

        let (existed, doc) = registry.remove("new");
        assert!(existed);
        assert!(doc.servers.is_empty());

        let (existed, _) = registry.remove("ghost");
        assert!(!existed);
    }
}
