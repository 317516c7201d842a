//! Session-scoped token accounting.
//!
//! Providers report usage in different shapes: a typed [`Usage`], a raw
//! `usage` block with `prompt_tokens`/`completion_tokens` or
//! `input_tokens`/`output_tokens`, or a `usage_metadata` block. One
//! [`TokenAccounting`] is created per session and passed by reference to
//! every model call site; nothing is global.

use agentgraph_core::message::Message;
use agentgraph_core::provider::{ProviderResponse, Usage};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use super::token::{estimate_message_tokens, estimate_messages_tokens};

/// Normalize whatever usage shape a response carries.
///
/// Returns `None` when the response reports no usage at all.
pub fn normalize_usage(response: &ProviderResponse) -> Option<Usage> {
    if let Some(usage) = response.usage {
        return Some(usage);
    }
    ["usage", "usage_metadata", "token_usage"]
        .iter()
        .find_map(|key| response.metadata.get(*key).and_then(usage_from_value))
}

fn usage_from_value(value: &Value) -> Option<Usage> {
    let field = |names: &[&str]| -> Option<u32> {
        names
            .iter()
            .find_map(|n| value.get(*n).and_then(Value::as_u64))
            .map(|v| v.min(u32::MAX as u64) as u32)
    };

    let prompt = field(&["prompt_tokens", "input_tokens", "prompt_token_count"]);
    let completion = field(&["completion_tokens", "output_tokens", "candidates_token_count"]);
    if prompt.is_none() && completion.is_none() {
        return None;
    }
    let prompt_tokens = prompt.unwrap_or(0);
    let completion_tokens = completion.unwrap_or(0);
    let total_tokens = field(&["total_tokens", "total_token_count"])
        .unwrap_or(prompt_tokens.saturating_add(completion_tokens));

    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub calls: u64,
    /// Calls whose usage had to be estimated locally.
    pub estimated_calls: u64,
}

/// Cumulative token counters for one session.
#[derive(Debug, Default)]
pub struct TokenAccounting {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    calls: AtomicU64,
    estimated_calls: AtomicU64,
}

impl TokenAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one model call and return the usage that was counted.
    ///
    /// Falls back to estimating from `request` and the response message when
    /// the provider reported nothing.
    pub fn record(&self, request: &[Message], response: &ProviderResponse) -> Usage {
        let usage = match normalize_usage(response) {
            Some(usage) => usage,
            None => {
                self.estimated_calls.fetch_add(1, Ordering::Relaxed);
                let prompt_tokens = estimate_messages_tokens(request) as u32;
                let completion_tokens = estimate_message_tokens(&response.message) as u32;
                Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                }
            }
        };
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
        usage
    }

    pub fn totals(&self) -> TokenTotals {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        TokenTotals {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            calls: self.calls.load(Ordering::Relaxed),
            estimated_calls: self.estimated_calls.load(Ordering::Relaxed),
        }
    }
}
