//! History compaction for conversations sent to the model.
//!
//! Two independent bounds keep requests within the model's context:
//!
//! - **History trimming** ([`trim_history`]): drop the oldest messages until
//!   the estimated token count fits a budget, always keeping the first
//!   message (the original task framing).
//! - **Tool result compression** ([`compress_tool_result`]): cap each tool
//!   result before it enters the conversation at all.
//!
//! Both are pure functions. Token counts are estimates (about four characters
//! per token), not tokenizer-exact.

use crate::mcp::CallToolResult;
use crate::session::{ContentPart, ConversationMessage, MessageContent};
use crate::utils::string::truncate_with_marker;

/// Flat cost of a tool use or tool result block, on top of its payload.
const STRUCTURAL_PART_TOKENS: usize = 50;

/// Cost of a block type we cannot measure.
const OPAQUE_PART_TOKENS: usize = 100;

/// Marker appended to truncated tool output.
pub const TRUNCATION_MARKER: &str = "... [truncated for brevity]";

/// Placeholder replacing image content in tool results.
pub const IMAGE_PLACEHOLDER: &str = "[Screenshot taken and analyzed]";

/// Stand-in for a result with no usable text. The model API rejects empty
/// text blocks.
pub const NO_OUTPUT: &str = "(no output)";

fn text_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn part_tokens(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } => text_tokens(text),
        ContentPart::ToolUse { input, .. } => {
            STRUCTURAL_PART_TOKENS + text_tokens(&input.to_string())
        }
        ContentPart::ToolResult { content, .. } => {
            STRUCTURAL_PART_TOKENS + content.iter().map(part_tokens).sum::<usize>()
        }
        ContentPart::Unsupported => OPAQUE_PART_TOKENS,
    }
}

/// Estimated token cost of one message.
pub fn estimate_message_tokens(message: &ConversationMessage) -> usize {
    match &message.content {
        MessageContent::Text(text) => text_tokens(text),
        MessageContent::Parts(parts) => parts.iter().map(part_tokens).sum(),
    }
}

/// Estimated token cost of a conversation.
///
/// # Examples
/// ```
/// use mcpdrive::agent::compaction::estimate_tokens;
/// use mcpdrive::session::ConversationMessage;
///
/// let msgs = vec![ConversationMessage::user("12345678")];
/// assert_eq!(estimate_tokens(&msgs), 2);
/// ```
pub fn estimate_tokens(messages: &[ConversationMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Trim a conversation to fit `budget` estimated tokens.
///
/// Returns the input unchanged when it already fits. Otherwise keeps the
/// first message plus as many of the most recent messages as fit, walking
/// backward from the end. A kept tail never starts with tool results whose
/// tool uses were trimmed away.
///
/// If the first message alone exceeds the budget, only the first message is
/// returned.
///
/// # Examples
/// ```
/// use mcpdrive::agent::compaction::{estimate_tokens, trim_history};
/// use mcpdrive::session::ConversationMessage;
///
/// let msgs = vec![
///     ConversationMessage::user("task"),
///     ConversationMessage::assistant(&"a".repeat(400)),
///     ConversationMessage::user("latest"),
/// ];
/// let trimmed = trim_history(msgs, 20);
/// assert_eq!(trimmed.len(), 2);
/// assert_eq!(trimmed[0].text(), "task");
/// assert!(estimate_tokens(&trimmed) <= 20);
/// ```
pub fn trim_history(messages: Vec<ConversationMessage>, budget: usize) -> Vec<ConversationMessage> {
    let costs: Vec<usize> = messages.iter().map(estimate_message_tokens).collect();
    if costs.iter().sum::<usize>() <= budget || messages.len() <= 1 {
        return messages;
    }

    let mut used = costs[0];
    let mut tail_start = messages.len();
    for idx in (1..messages.len()).rev() {
        if used + costs[idx] > budget {
            break;
        }
        used += costs[idx];
        tail_start = idx;
    }

    // Skip leading tail messages answering tool uses that did not survive.
    while tail_start < messages.len() && answers_missing_tool_use(&messages, tail_start) {
        tail_start += 1;
    }

    let mut iter = messages.into_iter();
    let mut result: Vec<ConversationMessage> = iter.next().into_iter().collect();
    result.extend(iter.skip(tail_start - 1));
    result
}

/// Whether message `idx` carries a tool result with no matching tool use in
/// messages `idx..` or the first message.
fn answers_missing_tool_use(messages: &[ConversationMessage], idx: usize) -> bool {
    messages[idx].parts().iter().any(|part| match part {
        ContentPart::ToolResult { tool_use_id, .. } => {
            let in_first = messages[0].tool_use_ids().contains(&tool_use_id.as_str());
            let in_tail = messages[idx..]
                .iter()
                .any(|m| m.tool_use_ids().contains(&tool_use_id.as_str()));
            !in_first && !in_tail
        }
        _ => false,
    })
}

/// Convert a tool result into model content parts, bounded in size.
///
/// Text beyond `max_chars` is cut and marked; images become a short
/// placeholder; other binary blocks are summarized by type.
pub fn compress_tool_result(result: &CallToolResult, max_chars: usize) -> Vec<ContentPart> {
    let parts: Vec<ContentPart> = result
        .content
        .iter()
        .map(|block| match block.kind.as_str() {
            "text" => match block.text.as_deref() {
                Some(text) if !text.trim().is_empty() => ContentPart::text(
                    truncate_with_marker(text, max_chars, TRUNCATION_MARKER).into_owned(),
                ),
                _ => ContentPart::text(NO_OUTPUT),
            },
            "image" => ContentPart::text(IMAGE_PLACEHOLDER),
            other => ContentPart::text(format!("[{} content omitted]", other)),
        })
        .collect();

    if parts.is_empty() {
        vec![ContentPart::text(NO_OUTPUT)]
    } else {
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ToolContent;
    use crate::session::Role;
    use serde_json::json;

    fn tool_use(id: &str) -> ConversationMessage {
        ConversationMessage::with_parts(
            Role::Assistant,
            vec![ContentPart::ToolUse {
                id: id.into(),
                name: "browser_click".into(),
                input: json!({"element": "OK"}),
            }],
        )
    }

    fn tool_result(id: &str, text: &str) -> ConversationMessage {
        ConversationMessage::with_parts(Role::User, vec![ContentPart::tool_result(id, text, false)])
    }

    // ── estimate_tokens ────────────────────────────────────────────────

    #[test]
    fn test_estimate_text_rounds_up() {
        assert_eq!(estimate_tokens(&[ConversationMessage::user("abc")]), 1);
        assert_eq!(estimate_tokens(&[ConversationMessage::user("abcde")]), 2);
        assert_eq!(estimate_tokens(&[]), 0);
    }

    #[test]
    fn test_estimate_structural_parts() {
        let result = tool_result("t1", "12345678");
        assert_eq!(estimate_tokens(&[result]), STRUCTURAL_PART_TOKENS + 2);

        let opaque = ConversationMessage::with_parts(Role::Assistant, vec![ContentPart::Unsupported]);
        assert_eq!(estimate_tokens(&[opaque]), OPAQUE_PART_TOKENS);
    }

    // ── trim_history ───────────────────────────────────────────────────

    #[test]
    fn test_trim_under_budget_is_unchanged() {
        let msgs = vec![
            ConversationMessage::user("go to example.com"),
            ConversationMessage::assistant("done"),
        ];
        let trimmed = trim_history(msgs.clone(), 1_000);
        assert_eq!(trimmed, msgs);
    }

    #[test]
    fn test_trim_keeps_first_and_recent() {
        let msgs: Vec<ConversationMessage> = (0..10)
            .map(|i| ConversationMessage::user(&format!("{}{}", i, "x".repeat(39))))
            .collect();
        // each message costs 10 tokens
        let trimmed = trim_history(msgs.clone(), 35);
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed[0], msgs[0]);
        assert_eq!(trimmed[1], msgs[8]);
        assert_eq!(trimmed[2], msgs[9]);
        assert!(estimate_tokens(&trimmed) <= 35);
    }

    #[test]
    fn test_trim_oversized_first_message() {
        let msgs = vec![
            ConversationMessage::user(&"x".repeat(400)),
            ConversationMessage::assistant("short"),
        ];
        let trimmed = trim_history(msgs, 10);
        assert_eq!(trimmed.len(), 1);
    }

    #[test]
    fn test_trim_drops_orphaned_tool_results() {
        let msgs = vec![
            ConversationMessage::user("task"),
            tool_use("a"),
            tool_result("a", &"r".repeat(2000)),
            tool_use("b"),
            tool_result("b", "ok"),
        ];
        // Both tool uses and their results fit in 200
        let trimmed = trim_history(msgs.clone(), 200);
        assert_eq!(trimmed.len(), 3);
        assert!(crate::session::find_orphan_tool_result(&trimmed).is_none());
        assert_eq!(
            trimmed.last().unwrap().parts()[0],
            ContentPart::tool_result("b", "ok", false)
        );

        // Only the last result fits, its tool use does not: drop it too
        let trimmed = trim_history(msgs, 60);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].text(), "task");
    }

    #[test]
    fn test_trim_budget_property() {
        for budget in [20usize, 60, 150, 400] {
            let mut msgs = vec![ConversationMessage::user("initial task framing")];
            for i in 0..30 {
                msgs.push(ConversationMessage::assistant(&"y".repeat(i * 7 + 1)));
            }
            let first = msgs[0].clone();
            let trimmed = trim_history(msgs, budget);
            assert_eq!(trimmed[0], first);
            assert!(estimate_tokens(&trimmed) <= budget, "budget {}", budget);
        }
    }

    // ── compress_tool_result ───────────────────────────────────────────

    #[test]
    fn test_compress_truncates_long_text() {
        let result = CallToolResult::text("z".repeat(6000));
        let parts = compress_tool_result(&result, 5000);
        let text = parts[0].as_text().unwrap();
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert_eq!(text.chars().count(), 5000 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_compress_replaces_images() {
        let result = CallToolResult {
            content: vec![
                ToolContent::text("Took screenshot"),
                ToolContent::image("iVBORw0KGgo=", "image/png"),
                ToolContent {
                    kind: "resource".into(),
                    text: None,
                    data: None,
                    mime_type: None,
                },
            ],
            is_error: false,
            timed_out: false,
        };
        let parts = compress_tool_result(&result, 5000);
        assert_eq!(parts[0].as_text(), Some("Took screenshot"));
        assert_eq!(parts[1].as_text(), Some(IMAGE_PLACEHOLDER));
        assert_eq!(parts[2].as_text(), Some("[resource content omitted]"));
    }

    #[test]
    fn test_compress_empty_result() {
        let result = CallToolResult {
            content: vec![],
            is_error: false,
            timed_out: false,
        };
        assert_eq!(compress_tool_result(&result, 10)[0].as_text(), Some(NO_OUTPUT));
    }

    #[test]
    fn test_compress_blank_text_blocks() {
        let mut missing = ToolContent::text("");
        missing.text = None;
        let result = CallToolResult {
            content: vec![ToolContent::text(""), ToolContent::text("  \n"), missing],
            is_error: false,
            timed_out: false,
        };
        let parts = compress_tool_result(&result, 100);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.as_text() == Some(NO_OUTPUT)));
    }
}
