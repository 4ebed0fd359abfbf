//! MCP client: JSON-RPC protocol, stdio/http transports, and the
//! process-level ref-counted server registry.

pub mod protocol;
pub mod registry;
pub mod transport;

pub use protocol::{scoped_tool_name, split_scoped_name, CallResult, ServerTool};
pub use registry::McpRegistry;
pub use transport::{McpTransport, TransportError};
