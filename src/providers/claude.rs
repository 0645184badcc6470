//! Claude (Anthropic) model provider
//!
//! Sends [`ModelRequest`]s to the Anthropic Messages API. The conversation
//! types already use Anthropic's block format, so the request body is the
//! request itself.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{DriveError, Result};

use super::parse_provider_error;
use super::types::{ModelProvider, ModelRequest, ModelResponse};

/// The Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude/Anthropic model provider.
pub struct ClaudeProvider {
    /// API key for authentication
    api_key: String,
    /// Base URL, without the `/v1/messages` suffix
    api_base: String,
    /// HTTP client for making requests
    client: Client,
}

impl ClaudeProvider {
    /// Create a new Claude provider with the given API key.
    ///
    /// # Example
    /// ```
    /// use mcpdrive::providers::{ClaudeProvider, ModelProvider};
    ///
    /// let provider = ClaudeProvider::new("sk-ant-api03-xxx");
    /// assert_eq!(provider.name(), "claude");
    /// ```
    pub fn new(api_key: &str) -> Self {
        Self::with_client(
            api_key,
            Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
        )
    }

    /// Create a new Claude provider with a custom HTTP client.
    pub fn with_client(api_key: &str, client: Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: crate::config::DEFAULT_API_BASE.to_string(),
            client,
        }
    }

    /// Build a provider from the model section of the config.
    ///
    /// Fails when no API key is configured.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                DriveError::Config(
                    "No model API key configured (set ANTHROPIC_API_KEY or model.api_key)".into(),
                )
            })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(api_key, client).with_api_base(&config.api_base))
    }

    /// Point the provider at a different API base (proxies, test servers).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.api_base)
    }
}

#[async_trait]
impl ModelProvider for ClaudeProvider {
    async fn create_message(&self, request: &ModelRequest) -> Result<ModelResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending model request"
        );

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DriveError::from(parse_provider_error(
                status,
                &error_body(&error_text),
            )));
        }

        let model_response: ModelResponse = response.json().await?;
        debug!(
            input_tokens = model_response.usage.input_tokens,
            output_tokens = model_response.usage.output_tokens,
            stop_reason = ?model_response.stop_reason,
            "Model response received"
        );
        Ok(model_response)
    }

    fn name(&self) -> &str {
        "claude"
    }
}

/// Claude API error response.
#[derive(Debug, Deserialize)]
struct ClaudeErrorResponse {
    error: ClaudeError,
}

/// Claude API error details.
#[derive(Debug, Deserialize)]
struct ClaudeError {
    r#type: String,
    message: String,
}

/// Human-readable body for a typed provider error.
fn error_body(error_text: &str) -> String {
    match serde_json::from_str::<ClaudeErrorResponse>(error_text) {
        Ok(parsed) => format!(
            "Claude API error: {} - {}",
            parsed.error.r#type, parsed.error.message
        ),
        Err(_) => format!("Claude API error: {}", error_text),
    }
}
