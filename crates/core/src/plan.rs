//! Plan and history types — what the agent is working on.
//!
//! In task-oriented modes the graph follows a [`Task`] made of ordered
//! [`Step`]s. In reactive mode it keeps a flat list of [`HistoryItem`]s
//! instead. Both end up in short-term memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::message::Role;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Returned when a status change would break the task lifecycle.
#[derive(Debug, Clone, Error)]
#[error("invalid task transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// The model's stated intent for a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub text: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Success,
    Error,
}

/// A tool invocation as remembered by a step or history item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: serde_json::Value,
    #[serde(default)]
    pub result: String,
    pub status: ToolCallStatus,
}

/// One step of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub thought: Thought,
    #[serde(default)]
    pub tool: Vec<ToolCallRecord>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Step {
    pub fn new(text: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thought: Thought {
                text: text.into(),
                reasoning: reasoning.into(),
            },
            tool: Vec::new(),
            status: StepStatus::Pending,
            result: None,
        }
    }
}

/// A planned unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub thought: String,
    pub steps: Vec<Step>,
    pub status: TaskStatus,
    /// Set once long-term facts have been extracted from this task.
    #[serde(default)]
    pub memorized: bool,
}

impl Task {
    pub fn new(thought: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thought: thought.into(),
            steps,
            status: TaskStatus::Pending,
            memorized: false,
        }
    }

    /// Move to `next`, enforcing pending → in_progress → completed|failed.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        let allowed = matches!(
            (self.status, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        );
        if !allowed {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Render the step history for memory extraction.
    pub fn format_history(&self) -> String {
        let mut out = format!("Task: {}\nStatus: {:?}\n", self.thought, self.status);
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}. [{:?}] {}\n", i + 1, step.status, step.thought.text));
            if !step.thought.reasoning.is_empty() {
                out.push_str(&format!("   Reasoning: {}\n", step.thought.reasoning));
            }
            for call in &step.tool {
                out.push_str(&format!("   Tool {} ({:?}): {}\n", call.name, call.status, call.result));
            }
            if let Some(result) = &step.result {
                out.push_str(&format!("   Result: {}\n", result));
            }
        }
        out
    }
}

/// A reactive-mode record of one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool: Vec<ToolCallRecord>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryItem {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Either the current plan or the reactive history, depending on mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum Progress {
    Tasks(Vec<Task>),
    History(Vec<HistoryItem>),
}

impl Default for Progress {
    fn default() -> Self {
        Progress::History(Vec::new())
    }
}
