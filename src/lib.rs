//! mcpdrive - model-driven tool orchestration over MCP
//!
//! A generation cycle sends a conversation to the model, runs the tools it
//! asks for on a remote MCP server, feeds the results back, and repeats until
//! the model answers in plain text.

pub mod agent;
pub mod config;
pub mod error;
pub mod mcp;
pub mod providers;
pub mod session;
pub mod utils;

pub use agent::{GenerateRequest, GenerationMode, Orchestrator, ProgressEmitter, ProgressEvent};
pub use config::Config;
pub use error::{DriveError, McpError, ProviderError, Result};
pub use mcp::{ClientRegistry, McpClient};
pub use providers::{ClaudeProvider, ModelProvider, ModelRequest, ModelResponse};
pub use session::{ContentPart, ConversationMessage, Role};
