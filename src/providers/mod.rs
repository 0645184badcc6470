//! Providers module - model service clients
//!
//! This module defines the `ModelProvider` trait used by the orchestrator and
//! the Anthropic implementation of it.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcpdrive::providers::{ClaudeProvider, ModelProvider, ModelRequest};
//! use mcpdrive::session::ConversationMessage;
//!
//! async fn example() {
//!     let provider = ClaudeProvider::new("your-api-key");
//!     let request = ModelRequest {
//!         model: "claude-3-5-sonnet-20241022".into(),
//!         max_tokens: 1024,
//!         messages: vec![ConversationMessage::user("Hello!")],
//!         system: None,
//!         tools: vec![],
//!     };
//!     let response = provider.create_message(&request).await.unwrap();
//!     println!("Response: {}", response.text());
//! }
//! ```

pub mod claude;
mod types;

use crate::error::ProviderError;

pub use claude::ClaudeProvider;
pub use types::{ModelProvider, ModelRequest, ModelResponse, ToolDefinition, Usage};

/// Parse an HTTP status code and response body into a structured [`ProviderError`].
///
/// Every classification is fatal to the generation cycle that hit it.
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 => ProviderError::Auth(body.to_string()),
        402 => ProviderError::Billing(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 => ProviderError::InvalidRequest(body.to_string()),
        500..=599 => ProviderError::ServerError(body.to_string()),
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
    }
}
