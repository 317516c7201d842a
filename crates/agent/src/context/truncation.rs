//! Truncation ladder — degrade an outgoing prompt under context pressure.
//!
//! Rungs are tried in order: the full history, then each recent-message
//! window (largest first), then a synthesized apology that never reaches the
//! model. Every rung is attempted at most once and each model-bound rung
//! sends strictly fewer messages than the one before it. `GraphState`
//! messages are never touched; only the outgoing copy is cut.

use agentgraph_core::error::ProviderError;
use agentgraph_core::message::{Message, Role};
use agentgraph_core::provider::{ProviderResponse, ToolDefinition};
use tracing::{debug, info, warn};

use super::accounting::TokenAccounting;
use super::token::{estimate_messages_tokens, estimate_tools_tokens};
use crate::model::ModelHandle;

pub const APOLOGY_TEXT: &str = "I'm sorry, this conversation has grown too long for me to continue. \
Please start a new thread or narrow the request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rung {
    Full,
    Recent(usize),
    Apology,
}

impl Rung {
    pub fn label(&self) -> String {
        match self {
            Rung::Full => "full".into(),
            Rung::Recent(n) => format!("recent_{n}"),
            Rung::Apology => "apology".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Answered,
    /// Estimate above the ceiling; the model was not called.
    OverBudget,
    /// The model rejected the request as too long.
    ContextLengthExceeded,
    /// The window was not smaller than the previous one.
    NotSmaller,
}

#[derive(Debug, Clone)]
pub struct RungAttempt {
    pub rung: Rung,
    pub message_count: usize,
    pub estimated_tokens: usize,
    pub outcome: AttemptOutcome,
}

/// The result of walking the ladder.
#[derive(Debug)]
pub struct LadderOutcome {
    /// The assistant message to append (model reply or apology).
    pub message: Message,
    /// `None` when the apology rung produced the message.
    pub response: Option<ProviderResponse>,
    pub rung: Rung,
    pub attempts: Vec<RungAttempt>,
}

impl LadderOutcome {
    pub fn model_calls(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| {
                matches!(
                    a.outcome,
                    AttemptOutcome::Answered | AttemptOutcome::ContextLengthExceeded
                )
            })
            .count()
    }
}

/// The last `n` messages, counting a leading system message against `n`.
///
/// Tool results at the front of the window whose requesting assistant
/// message was cut off are dropped.
pub fn recent_window(messages: &[Message], n: usize) -> Vec<Message> {
    if n == 0 || messages.is_empty() {
        return Vec::new();
    }
    let (system, rest) = match messages.first() {
        Some(first) if first.role == Role::System => (Some(first), &messages[1..]),
        _ => (None, messages),
    };
    let tail_len = if system.is_some() { n - 1 } else { n };
    let mut tail = &rest[rest.len().saturating_sub(tail_len)..];
    while tail.first().is_some_and(|m| m.role == Role::Tool) {
        tail = &tail[1..];
    }

    let mut window = Vec::with_capacity(n);
    if let Some(system) = system {
        window.push(system.clone());
    }
    window.extend(tail.iter().cloned());
    window
}

pub fn apology_message() -> Message {
    Message::assistant(APOLOGY_TEXT)
        .with_metadata("truncation", serde_json::json!("apology"))
        .with_metadata("terminal", serde_json::json!(true))
}

pub struct TruncationLadder {
    token_ceiling: usize,
    windows: Vec<usize>,
}

impl TruncationLadder {
    pub fn new(token_ceiling: usize, windows: Vec<usize>) -> Self {
        Self {
            token_ceiling,
            windows,
        }
    }

    pub fn token_ceiling(&self) -> usize {
        self.token_ceiling
    }

    /// All rungs in the order they are tried.
    pub fn rungs(&self) -> Vec<Rung> {
        let mut rungs = vec![Rung::Full];
        rungs.extend(self.windows.iter().map(|n| Rung::Recent(*n)));
        rungs.push(Rung::Apology);
        rungs
    }

    /// Invoke `model`, stepping down the ladder on budget or context-length
    /// failures. Any other provider error is returned as is.
    pub async fn invoke(
        &self,
        model: &ModelHandle,
        messages: &[Message],
        tools: &[ToolDefinition],
        accounting: &TokenAccounting,
    ) -> Result<LadderOutcome, ProviderError> {
        let tool_tokens = if model.supports_tools() {
            estimate_tools_tokens(tools)
        } else {
            0
        };
        let mut attempts = Vec::new();
        let mut previous_count: Option<usize> = None;

        for rung in self.rungs() {
            let window = match rung {
                Rung::Full => messages.to_vec(),
                Rung::Recent(n) => recent_window(messages, n),
                Rung::Apology => {
                    warn!(
                        attempts = attempts.len(),
                        "Truncation ladder exhausted; answering with apology"
                    );
                    return Ok(LadderOutcome {
                        message: apology_message(),
                        response: None,
                        rung,
                        attempts,
                    });
                }
            };

            let estimated_tokens = estimate_messages_tokens(&window) + tool_tokens;
            let mut attempt = RungAttempt {
                rung,
                message_count: window.len(),
                estimated_tokens,
                outcome: AttemptOutcome::NotSmaller,
            };

            if previous_count.is_some_and(|prev| window.len() >= prev) || window.is_empty() {
                debug!(rung = %rung.label(), count = window.len(), "Skipping rung that does not shrink the prompt");
                attempts.push(attempt);
                continue;
            }
            previous_count = Some(window.len());

            if estimated_tokens > self.token_ceiling {
                debug!(
                    rung = %rung.label(),
                    estimated_tokens,
                    ceiling = self.token_ceiling,
                    "Prompt over budget, stepping down"
                );
                attempt.outcome = AttemptOutcome::OverBudget;
                attempts.push(attempt);
                continue;
            }

            match model.invoke(window, tools, accounting).await {
                Ok(response) => {
                    if rung != Rung::Full {
                        info!(rung = %rung.label(), "Answered from a truncated prompt");
                    }
                    attempt.outcome = AttemptOutcome::Answered;
                    attempts.push(attempt);
                    return Ok(LadderOutcome {
                        message: response.message.clone(),
                        response: Some(response),
                        rung,
                        attempts,
                    });
                }
                Err(e) if e.is_context_length() => {
                    warn!(rung = %rung.label(), error = %e, "Context length exceeded, stepping down");
                    attempt.outcome = AttemptOutcome::ContextLengthExceeded;
                    attempts.push(attempt);
                }
                Err(e) => return Err(e),
            }
        }

        // `rungs()` always ends with the apology rung.
        Ok(LadderOutcome {
            message: apology_message(),
            response: None,
            rung: Rung::Apology,
            attempts,
        })
    }
}
