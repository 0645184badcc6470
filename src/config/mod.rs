//! Configuration management for mcpdrive
//!
//! Configuration is loaded from `~/.mcpdrive/config.json` with environment
//! variable overrides. There is no process-wide config instance: callers load
//! a `Config` and pass the relevant sections down.

mod types;

pub use types::*;

use crate::error::{DriveError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the mcpdrive configuration directory path (~/.mcpdrive)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mcpdrive")
    }

    /// Returns the path to the config file (~/.mcpdrive/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: MCPDRIVE_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Model
        if let Ok(val) = std::env::var("MCPDRIVE_MODEL_API_KEY") {
            self.model.api_key = Some(val);
        } else if self.model.api_key.is_none() {
            if let Ok(val) = std::env::var("ANTHROPIC_API_KEY") {
                self.model.api_key = Some(val);
            }
        }
        if let Ok(val) = std::env::var("MCPDRIVE_MODEL_API_BASE") {
            self.model.api_base = val;
        }
        if let Ok(val) = std::env::var("MCPDRIVE_MODEL_NAME") {
            self.model.model = val;
        }
        if let Ok(val) = std::env::var("MCPDRIVE_MODEL_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                self.model.max_tokens = v;
            }
        }

        // MCP
        if let Ok(val) = std::env::var("MCPDRIVE_MCP_CALL_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.mcp.call_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("MCPDRIVE_MCP_CONNECT_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.mcp.connect_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("MCPDRIVE_MCP_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                self.mcp.max_retries = v;
            }
        }

        // Orchestrator
        if let Ok(val) = std::env::var("MCPDRIVE_ORCHESTRATOR_MAX_ITERATIONS") {
            if let Ok(v) = val.parse() {
                self.orchestrator.max_iterations = v;
            }
        }
        if let Ok(val) = std::env::var("MCPDRIVE_ORCHESTRATOR_TOKEN_BUDGET") {
            if let Ok(v) = val.parse() {
                self.orchestrator.token_budget = v;
            }
        }
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.mcp.max_retries == 0 {
            return Err(DriveError::Config(
                "mcp.max_retries must be at least 1".into(),
            ));
        }
        if self.orchestrator.max_iterations == 0 {
            return Err(DriveError::Config(
                "orchestrator.max_iterations must be at least 1".into(),
            ));
        }
        if self.orchestrator.token_budget == 0 {
            return Err(DriveError::Config(
                "orchestrator.token_budget must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration to a specific path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
