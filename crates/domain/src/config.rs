//! Configuration types.
//!
//! `ServerConfig` deserializes from an optional `coworker.toml`; session
//! settings come from the CLI and per-connection defaults. MCP server
//! documents are also mutated at runtime through the registry RPCs.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_max_steps() -> u32 {
    24
}

/// Per-session settings, sent back to the client in `server_hello`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Provider id (e.g. `"openai"`, `"anthropic"`).
    pub provider: String,
    /// Model identifier understood by the provider.
    pub model: String,
    /// Directory tools treat as the workspace root.
    pub working_dir: PathBuf,
    /// Directory transcripts and artifacts are written under.
    pub output_dir: PathBuf,
    /// Expose MCP-hosted tools to the model.
    #[serde(default)]
    pub enable_mcp: bool,
    /// Auto-approve every gated tool call without asking.
    #[serde(default)]
    pub yolo: bool,
    /// Upper bound on model-stream steps per turn.
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    /// System prompt prepended to every turn.
    #[serde(default)]
    pub system: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-5".into(),
            working_dir: PathBuf::from("."),
            output_dir: PathBuf::from(".coworker"),
            enable_mcp: false,
            yolo: false,
            max_steps: d_max_steps(),
            system: String::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_port() -> u16 {
    7777
}

/// Process-level configuration (`coworker.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Directory holding per-provider credential documents.
    #[serde(default)]
    pub credentials_dir: Option<PathBuf>,
    /// Session defaults applied to new connections.
    #[serde(default)]
    pub session: SessionDefaults,
    /// MCP server registry document.
    #[serde(default)]
    pub mcp: McpDocument,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            credentials_dir: None,
            session: SessionDefaults::default(),
            mcp: McpDocument::default(),
        }
    }
}

/// Overridable pieces of [`SessionConfig`] from the config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionDefaults {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub max_steps: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP server document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_retries() -> u32 {
    3
}

/// The MCP server registry document, as stored and as sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpDocument {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// Configuration for a single MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique name (used in tool naming: `mcp__<name>__<tool>`).
    pub name: String,
    pub transport: McpTransportConfig,
    /// When true, a failed connect is fatal at startup.
    #[serde(default)]
    pub required: bool,
    /// Connect attempts before giving up.
    #[serde(default = "d_retries")]
    pub retries: u32,
}

/// How to reach an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 7777);
        assert!(cfg.mcp.servers.is_empty());
    }

    #[test]
    fn mcp_document_parses_stdio_server() {
        let doc: McpDocument = serde_json::from_value(serde_json::json!({
            "servers": [{
                "name": "files",
                "transport": {"type": "stdio", "command": "npx", "args": ["-y", "server-filesystem"]}
            }]
        }))
        .unwrap();
        assert_eq!(doc.servers.len(), 1);
        assert_eq!(doc.servers[0].retries, 3);
        assert!(!doc.servers[0].required);
        match &doc.servers[0].transport {
            McpTransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected stdio transport, got {other:?}"),
        }
    }

    #[test]
    fn mcp_http_transport_parses() {
        let server: McpServerConfig = serde_json::from_value(serde_json::json!({
            "name": "remote",
            "transport": {"type": "http", "url": "http://localhost:9000/mcp"},
            "retries": 1
        }))
        .unwrap();
        assert_eq!(server.retries, 1);
        match server.transport {
            McpTransportConfig::Http { ref url, .. } => assert!(url.ends_with("/mcp")),
            other => panic!("expected http transport, got {other:?}"),
        }
    }

    #[test]
    fn session_config_default_step_bound() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.max_steps, 24);
        assert!(!cfg.yolo);
    }
}
