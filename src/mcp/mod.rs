//! MCP (Model Context Protocol) client side
//!
//! - [`protocol`]: JSON-RPC envelopes, catalog and tool result types
//! - [`transport`]: the [`Connector`] seam and the HTTP+SSE implementation
//! - [`client`]: [`McpClient`], one managed connection per endpoint
//! - [`registry`]: [`ClientRegistry`], endpoint-keyed client cache
//! - [`memory`]: in-process tool provider for tests and dry runs

pub mod client;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use client::{ConnectionState, McpClient};
pub use memory::MemoryConnector;
pub use protocol::{
    normalize_endpoint, sanitize_arguments, CallToolResult, ToolCatalogEntry, ToolContent,
};
pub use registry::{ClientRegistry, HealthStatus};
pub use transport::{Connection, Connector, Outbound, SseConnector};
