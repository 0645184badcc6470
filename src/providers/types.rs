//! Provider types for mcpdrive
//!
//! This module defines the `ModelProvider` trait and the request/response
//! shapes exchanged with the model service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mcp::ToolCatalogEntry;
use crate::session::{extract_text, ContentPart, ConversationMessage};

/// Definition of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (must be unique)
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    ///
    /// # Example
    /// ```
    /// use mcpdrive::providers::ToolDefinition;
    /// use serde_json::json;
    ///
    /// let tool = ToolDefinition::new(
    ///     "browser_navigate",
    ///     "Navigate to a URL",
    ///     json!({
    ///         "type": "object",
    ///         "properties": { "url": { "type": "string" } },
    ///         "required": ["url"]
    ///     }),
    /// );
    /// assert_eq!(tool.name, "browser_navigate");
    /// ```
    pub fn new(name: &str, description: &str, input_schema: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

impl From<&ToolCatalogEntry> for ToolDefinition {
    fn from(entry: &ToolCatalogEntry) -> Self {
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            input_schema: entry.input_schema.clone(),
        }
    }
}

/// One request to the model service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<ConversationMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Token usage reported by the model service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// The model's reply: an ordered list of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl ModelResponse {
    /// Build a response from parts alone (usage zeroed).
    pub fn from_parts(content: Vec<ContentPart>) -> Self {
        Self {
            content,
            stop_reason: None,
            usage: Usage::default(),
        }
    }

    /// Text parts joined with single spaces.
    pub fn text(&self) -> String {
        extract_text(&self.content)
    }

    /// Whether the model asked for at least one tool run.
    pub fn has_tool_uses(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, ContentPart::ToolUse { .. }))
    }
}

/// A model service that turns a conversation into the next assistant turn.
///
/// Errors from `create_message` are fatal to a generation cycle.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Request the next assistant message.
    async fn create_message(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Get the provider name.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_empty_tools_and_system() {
        let request = ModelRequest {
            model: "m".into(),
            max_tokens: 10,
            messages: vec![ConversationMessage::user("hi")],
            system: None,
            tools: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("system").is_none());
        assert_eq!(value["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_response_text_and_tool_uses() {
        let response: ModelResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Opening"},
                {"type": "tool_use", "id": "t1", "name": "browser_navigate", "input": {"url": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 4}
        }))
        .unwrap();
        assert_eq!(response.text(), "Opening");
        assert!(response.has_tool_uses());
        assert_eq!(response.usage.input_tokens, 12);
    }

    #[test]
    fn test_definition_from_catalog_entry() {
        let entry = ToolCatalogEntry::new("browser_snapshot", None, None);
        let def = ToolDefinition::from(&entry);
        assert_eq!(def.description, "Tool: browser_snapshot");
        assert_eq!(def.input_schema["type"], "object");
    }
}
