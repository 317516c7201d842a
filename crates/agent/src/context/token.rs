//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Every budget
//! in the graph (truncation ceiling, STM thresholds) is checked against
//! these estimates, never against provider-reported counts, so decisions are
//! reproducible offline.

use agentgraph_core::memory::StmContent;
use agentgraph_core::message::Message;
use agentgraph_core::provider::ToolDefinition;

/// Per-message overhead for role name, delimiters and wire formatting.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.len() + 3) / 4
}

/// Estimate tokens for a single message, including tool call arguments.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a slice of tool definitions (serialized as JSON).
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

/// Estimate tokens for a short-term memory item as it will be rendered.
pub fn estimate_stm_tokens(content: &StmContent) -> usize {
    estimate_tokens(&content.render())
}

/// Cut `text` so its estimate is strictly below `max_tokens`.
///
/// Cuts on a char boundary; returns the input unchanged if it already fits.
pub fn clip_below_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) < max_tokens {
        return text.to_string();
    }
    let max_bytes = max_tokens.saturating_sub(1) * 4;
    let mut end = max_bytes.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
