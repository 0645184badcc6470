//! Configuration type definitions for mcpdrive
//!
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration struct for mcpdrive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model service settings (API key, model name, token limits)
    pub model: ModelConfig,
    /// Tool-provider connection settings
    pub mcp: McpConfig,
    /// Tool loop settings
    pub orchestrator: OrchestratorConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

// ============================================================================
// Model Configuration
// ============================================================================

/// Default model used when none is configured.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Default Anthropic API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Model service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API key for the model service
    pub api_key: Option<String>,
    /// Base URL of the model service
    pub api_base: String,
    /// Model identifier sent with each request
    pub model: String,
    /// Maximum tokens the model may generate per request
    pub max_tokens: u32,
    /// HTTP timeout for one model request
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            request_timeout_secs: 120,
        }
    }
}

// ============================================================================
// MCP Configuration
// ============================================================================

/// Connection and call settings for MCP tool providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Connection attempts per connect before giving up
    pub max_retries: u32,
    /// Base delay between connection attempts (grows by 1.5x per attempt)
    pub retry_delay_ms: u64,
    /// Deadline for one connection attempt (handshake + catalog fetch)
    pub connect_timeout_secs: u64,
    /// Interval between liveness probes
    pub keepalive_interval_secs: u64,
    /// Deadline for one tool call
    pub call_timeout_secs: u64,
    /// Pause between detecting connection loss and re-dialing
    pub reconnect_cooldown_ms: u64,
    /// No re-dial within this window after a successful connection
    pub min_reconnect_interval_ms: u64,
    /// Reconnection cycles attempted before settling in `Disconnected`
    pub max_reconnect_attempts: u32,
    /// Clients idle for this long are disconnected and evicted
    pub idle_timeout_secs: u64,
    /// How often the registry looks for idle clients (0 disables the sweep)
    pub eviction_sweep_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1500,
            connect_timeout_secs: 10,
            keepalive_interval_secs: 30,
            call_timeout_secs: 30,
            reconnect_cooldown_ms: 2000,
            min_reconnect_interval_ms: 5000,
            max_reconnect_attempts: 5,
            idle_timeout_secs: 30 * 60,
            eviction_sweep_secs: 60,
        }
    }
}

impl McpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    pub fn min_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.min_reconnect_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn eviction_sweep(&self) -> Duration {
        Duration::from_secs(self.eviction_sweep_secs)
    }
}

// ============================================================================
// Orchestrator Configuration
// ============================================================================

/// Tool loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Model calls per cycle before giving up on tool use
    pub max_iterations: u32,
    /// Estimated-token budget for the conversation sent to the model
    pub token_budget: usize,
    /// Text tool results longer than this are truncated
    pub max_tool_result_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            token_budget: 150_000,
            max_tool_result_chars: 5000,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// Compact single-line output with component fields
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default level filter when `RUST_LOG` is unset
    pub level: String,
    /// Optional file to append JSON logs to
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
