//! Error types for mcpdrive
//!
//! This module defines all error types used throughout the crate.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured model-service error classification.
///
/// Every variant is fatal to a generation cycle; the classification exists so
/// callers can render a useful message (bad key vs. overloaded service).
#[derive(Debug)]
pub enum ProviderError {
    /// 401 — Invalid API key or authentication failure
    Auth(String),
    /// 429 — Rate limit or quota exceeded
    RateLimit(String),
    /// 402 — Payment required or billing issue
    Billing(String),
    /// 500/502/503/504 — Server-side errors
    ServerError(String),
    /// 400 — Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404 — Model not found or endpoint not available
    ModelNotFound(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::Billing(msg) => write!(f, "Billing error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::Billing(_) => Some(402),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Unknown(_) => None,
        }
    }
}

impl From<ProviderError> for DriveError {
    fn from(err: ProviderError) -> Self {
        DriveError::ProviderTyped(err)
    }
}

// ============================================================================
// MCP Error Classification
// ============================================================================

/// JSON-RPC error code some MCP servers use for request timeouts.
pub const RPC_REQUEST_TIMEOUT: i64 = -32001;

/// Errors raised at the tool-provider protocol boundary.
///
/// `Clone` so a single in-flight connection attempt can hand the same
/// failure to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    /// Endpoint string could not be turned into an http(s) URL.
    #[error("Invalid MCP endpoint: {0}")]
    InvalidEndpoint(String),

    /// Every connection attempt failed.
    #[error("Failed to connect to MCP server after {attempts} attempts. Last error: {message}")]
    Connection { attempts: u32, message: String },

    /// A request exceeded its deadline.
    #[error("MCP request timed out after {0} ms")]
    Timeout(u64),

    /// The server answered with a JSON-RPC error object.
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The underlying HTTP/SSE transport failed.
    #[error("MCP transport error: {0}")]
    Transport(String),

    /// The event stream closed while requests were outstanding.
    #[error("MCP connection lost")]
    ConnectionLost,

    /// An operation requiring a live session ran without one.
    #[error("MCP client not connected")]
    NotConnected,

    /// The server sent something that does not follow the protocol.
    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

impl McpError {
    /// Whether this failure should be treated as "the call may still have
    /// completed on the remote side".
    pub fn is_timeout(&self) -> bool {
        match self {
            McpError::Timeout(_) => true,
            McpError::Rpc { code, message } => {
                *code == RPC_REQUEST_TIMEOUT || mentions_timeout(message)
            }
            McpError::Transport(message) => mentions_timeout(message),
            _ => false,
        }
    }
}

fn mentions_timeout(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timed out") || lower.contains("timeout")
}

impl From<McpError> for DriveError {
    fn from(err: McpError) -> Self {
        DriveError::Mcp(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for mcpdrive operations.
#[derive(Error, Debug)]
pub enum DriveError {
    /// Configuration-related errors (invalid config, missing API key, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model service rejected the request.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Tool-provider protocol errors.
    #[error("MCP error: {0}")]
    Mcp(McpError),

    /// Persistence handoff failures.
    #[error("Session error: {0}")]
    Session(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for mcpdrive operations.
pub type Result<T> = std::result::Result<T, DriveError>;
