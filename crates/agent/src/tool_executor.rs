//! Tool execution wrapper.
//!
//! Runs the tool calls of the last assistant message through the registry,
//! one after another. Results are capped, appended as tool-result messages,
//! and recorded on the active step (or reactive history item). Errors from
//! the registry are returned unchanged; there is no retry here. Calls that
//! already have a result are skipped, so a batch that failed partway can be
//! resumed from its checkpoint.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use agentgraph_core::agent::GraphState;
use agentgraph_core::error::ToolError;
use agentgraph_core::event::{DomainEvent, EventBus};
use agentgraph_core::message::{Message, MessageToolCall, Role};
use agentgraph_core::plan::{HistoryItem, Progress, ToolCallRecord, ToolCallStatus};
use agentgraph_core::tool::{ToolCall, ToolRegistry, ToolResult};
use chrono::Utc;
use tracing::{debug, info, warn};

/// What happened to one call.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub call_id: String,
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    /// Characters removed by the result cap (0 if none).
    pub truncated_chars: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ToolBatchReport {
    pub executions: Vec<ToolExecution>,
}

impl ToolBatchReport {
    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

/// Cap `text` at `max_chars` characters, appending a marker that says how
/// much was cut. Returns the text and the number of characters removed.
pub fn cap_text(text: &str, max_chars: usize) -> (String, usize) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text.to_string(), 0);
    }
    let removed = total - max_chars;
    let mut kept: String = text.chars().take(max_chars).collect();
    kept.push_str(&format!("\n[truncated {removed} characters]"));
    (kept, removed)
}

/// Output plus the structured data rendering, as the model will see it.
pub fn combined_result_text(result: &ToolResult) -> String {
    match &result.data {
        Some(data) => format!("{}\n{}", result.output, data),
        None => result.output.clone(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    max_result_chars: usize,
    max_arg_log_chars: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            max_result_chars: 5_000,
            max_arg_log_chars: 200,
            event_bus: None,
        }
    }

    pub fn with_limits(mut self, max_result_chars: usize, max_arg_log_chars: usize) -> Self {
        self.max_result_chars = max_result_chars;
        self.max_arg_log_chars = max_arg_log_chars;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn publish(&self, name: &str, success: bool, duration_ms: u64, truncated: bool) {
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: name.to_string(),
                success,
                duration_ms,
                truncated,
                timestamp: Utc::now(),
            });
        }
    }

    /// Execute the unanswered tool calls of the last assistant message.
    pub async fn execute(&self, state: &mut GraphState) -> Result<ToolBatchReport, ToolError> {
        let calls = pending_calls(state);
        if calls.is_empty() {
            return Ok(ToolBatchReport::default());
        }

        debug!(tool_count = calls.len(), "Executing tool calls");
        let mut report = ToolBatchReport::default();

        for tc in calls {
            let arguments: serde_json::Value = if tc.arguments.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&tc.arguments).map_err(|e| {
                    ToolError::InvalidArguments(format!("{}: arguments are not JSON: {e}", tc.name))
                })?
            };

            info!(
                tool = %tc.name,
                args = %preview(&tc.arguments, self.max_arg_log_chars),
                "Executing tool"
            );

            let call = ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: arguments.clone(),
            };
            let start = Instant::now();
            let result = self.registry.execute(&call).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %tc.name, error = %e, duration_ms, "Tool execution failed");
                    self.publish(&tc.name, false, duration_ms, false);
                    return Err(e);
                }
            };

            let (text, truncated_chars) = cap_text(&combined_result_text(&result), self.max_result_chars);
            if truncated_chars > 0 {
                info!(tool = %tc.name, truncated_chars, "Tool result truncated");
            }
            debug!(tool = %tc.name, duration_ms, success = result.success, "Tool finished");

            let mut message = Message::tool_result(&tc.id, &text)
                .with_metadata("tool_name", serde_json::json!(tc.name))
                .with_metadata("duration_ms", serde_json::json!(duration_ms));
            if truncated_chars > 0 {
                message = message.with_metadata("truncated", serde_json::json!(true));
            }
            state.push_message(message);

            record_tool_call(
                state,
                ToolCallRecord {
                    name: tc.name.clone(),
                    args: arguments,
                    result: text,
                    status: if result.success {
                        ToolCallStatus::Success
                    } else {
                        ToolCallStatus::Error
                    },
                },
            );

            self.publish(&tc.name, result.success, duration_ms, truncated_chars > 0);
            report.executions.push(ToolExecution {
                call_id: tc.id,
                name: tc.name,
                success: result.success,
                duration_ms,
                truncated_chars,
            });
        }

        Ok(report)
    }
}

/// Tool calls of the last assistant message with no tool-result message yet.
pub fn pending_calls(state: &GraphState) -> Vec<MessageToolCall> {
    let Some(pos) = state.messages.iter().rposition(|m| m.role == Role::Assistant) else {
        return Vec::new();
    };
    let (head, tail) = state.messages.split_at(pos + 1);
    let answered: HashSet<&str> = tail
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    head[pos]
        .tool_calls
        .iter()
        .filter(|tc| !answered.contains(tc.id.as_str()))
        .cloned()
        .collect()
}

/// Attach a record to the active step, or to the newest reactive history item.
fn record_tool_call(state: &mut GraphState, record: ToolCallRecord) {
    if let Some(step) = state.active_step_mut() {
        step.tool.push(record);
        return;
    }
    if let Progress::History(items) = &mut state.progress {
        match items.last_mut() {
            Some(item) => item.tool.push(record),
            None => {
                let mut item = HistoryItem::new(Role::Tool, "");
                item.tool.push(record);
                items.push(item);
            }
        }
    }
}
