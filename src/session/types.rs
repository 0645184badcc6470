//! Conversation types for mcpdrive
//!
//! This module defines the conversation data model exchanged with the model
//! service (messages and typed content parts) and the progress trace that is
//! persisted once per generation cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Messages from the user (including tool results)
    User,
    /// Messages from the model
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One typed part of a structured message.
///
/// Serialized in the model service's block format (`{"type": "tool_use", ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text { text: String },
    /// The model asking for a tool to be run
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// The outcome of a tool run, answering the `ToolUse` with the same id
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentPart>,
        #[serde(default)]
        is_error: bool,
    },
    /// Block types this crate does not act on (e.g. thinking blocks)
    #[serde(other)]
    Unsupported,
}

impl ContentPart {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Create a tool result part carrying a single text block.
    pub fn tool_result(tool_use_id: &str, text: impl Into<String>, is_error: bool) -> Self {
        ContentPart::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: vec![ContentPart::text(text)],
            is_error,
        }
    }

    /// Text of a `Text` part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message content: either a plain string or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// The role of the message sender
    pub role: Role,
    /// Text or structured content
    pub content: MessageContent,
}

impl ConversationMessage {
    /// Create a plain-text user message.
    ///
    /// # Example
    /// ```
    /// use mcpdrive::session::{ConversationMessage, Role};
    ///
    /// let msg = ConversationMessage::user("go to example.com");
    /// assert_eq!(msg.role, Role::User);
    /// assert_eq!(msg.text(), "go to example.com");
    /// ```
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.to_string()),
        }
    }

    /// Create a plain-text assistant message.
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.to_string()),
        }
    }

    /// Create a message from structured parts.
    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }

    /// Structured parts of this message (empty for plain text).
    pub fn parts(&self) -> &[ContentPart] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Parts(parts) => parts,
        }
    }

    /// All text in the message, text parts joined by a single space.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => extract_text(parts),
        }
    }

    /// Ids of the tool uses requested in this message.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.parts()
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Join the text parts of a block list with single spaces.
pub fn extract_text(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(ContentPart::as_text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check that every tool result answers a tool use requested earlier in the
/// conversation. Returns the first orphaned `tool_use_id`, if any.
pub fn find_orphan_tool_result(messages: &[ConversationMessage]) -> Option<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for msg in messages {
        for part in msg.parts() {
            match part {
                ContentPart::ToolUse { id, .. } => seen.push(id),
                ContentPart::ToolResult { tool_use_id, .. } => {
                    if !seen.contains(&tool_use_id.as_str()) {
                        return Some(tool_use_id);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

// ============================================================================
// Progress trace
// ============================================================================

/// Lifecycle state of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Running,
    Completed,
    Error,
}

/// One tool invocation as shown to the human watching the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Provider-assigned tool use id
    pub id: String,
    /// Tool name
    pub name: String,
    /// Human-readable summary of what the call does
    pub description: String,
    /// Arguments as requested by the model
    pub arguments: Value,
    pub status: InvocationStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocation {
    /// Start tracking a call.
    pub fn start(id: &str, name: &str, description: String, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description,
            arguments,
            status: InvocationStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    /// Mark the call finished successfully.
    pub fn complete(&mut self) {
        self.status = InvocationStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    /// Mark the call failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = InvocationStatus::Error;
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// Summary of one generation cycle, handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Invocations in the order they were requested
    pub invocations: Vec<ToolInvocation>,
    /// Model calls made in the cycle
    pub iterations: u32,
    /// Wall-clock duration of the cycle
    pub total_time_ms: u64,
    /// Invocations that ended `Completed`
    pub completed_count: usize,
    /// All invocations
    pub total_count: usize,
}

impl ProgressRecord {
    /// Build the summary from the final invocation snapshot.
    pub fn new(invocations: Vec<ToolInvocation>, iterations: u32, total_time_ms: u64) -> Self {
        let completed_count = invocations
            .iter()
            .filter(|i| i.status == InvocationStatus::Completed)
            .count();
        let total_count = invocations.len();
        Self {
            invocations,
            iterations,
            total_time_ms,
            completed_count,
            total_count,
        }
    }
}
