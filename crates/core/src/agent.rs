//! Graph state — everything a conversation thread carries between nodes.
//!
//! `GraphState` is the checkpoint payload: it must round-trip through serde
//! so a thread can be suspended (human input, iteration cap) and resumed on
//! another process.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::memory::Memories;
use crate::message::{Message, Role};
use crate::plan::{Progress, Step, Task, TaskStatus};

/// How the graph treats final answers and human checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Single-shot: a reply without tool calls ends the turn.
    #[default]
    Interactive,
    /// Loops until an external cap stops it.
    Autonomous,
    /// Autonomous, but may pause for a human.
    Hybrid,
}

/// Identity of a graph node, top-level or memory sub-graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    #[default]
    Start,
    #[serde(alias = "task_manager")]
    Planner,
    /// The executor: calls the model for the active step.
    Agent,
    Tools,
    Verifier,
    HumanInput,
    End,
    StmManager,
    LtmManager,
    RetrieveMemory,
    EndSubgraph,
}

impl NodeId {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::Start => "start",
            NodeId::Planner => "planner",
            NodeId::Agent => "agent",
            NodeId::Tools => "tools",
            NodeId::Verifier => "verifier",
            NodeId::HumanInput => "human_input",
            NodeId::End => "end",
            NodeId::StmManager => "stm_manager",
            NodeId::LtmManager => "ltm_manager",
            NodeId::RetrieveMemory => "retrieve_memory",
            NodeId::EndSubgraph => "end_subgraph",
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the thread stands between invocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    AwaitingHumanInput,
    Completed,
    StepLimitReached,
    /// The per-invocation cap was hit; the thread may be resumed.
    IterationLimitReached,
    Failed,
}

impl RunStatus {
    /// Terminal statuses route straight to `End`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::StepLimitReached | RunStatus::Failed
        )
    }
}

/// The state of one conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    pub thread_id: String,
    pub user_id: String,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Append-only turn records.
    pub messages: Vec<Message>,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub current_task_index: usize,
    #[serde(default)]
    pub current_step_index: usize,
    /// Node executions so far; the authoritative budget counter.
    #[serde(default)]
    pub current_graph_step: u32,
    pub memories: Memories,
    #[serde(default)]
    pub last_node: NodeId,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub status: RunStatus,
}

impl GraphState {
    pub fn new(user_id: impl Into<String>, mode: ExecutionMode, memories: Memories) -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            mode,
            messages: Vec::new(),
            progress: Progress::default(),
            current_task_index: 0,
            current_step_index: 0,
            current_graph_step: 0,
            memories,
            last_node: NodeId::Start,
            retry: 0,
            status: RunStatus::Running,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Install a new task as the active one. Switches progress to task mode.
    pub fn push_task(&mut self, task: Task) {
        match &mut self.progress {
            Progress::Tasks(tasks) => {
                tasks.push(task);
                self.current_task_index = tasks.len() - 1;
            }
            Progress::History(_) => {
                self.progress = Progress::Tasks(vec![task]);
                self.current_task_index = 0;
            }
        }
        self.current_step_index = 0;
        self.retry = 0;
    }

    pub fn active_task(&self) -> Option<&Task> {
        match &self.progress {
            Progress::Tasks(tasks) => tasks.get(self.current_task_index),
            Progress::History(_) => None,
        }
    }

    pub fn active_task_mut(&mut self) -> Option<&mut Task> {
        match &mut self.progress {
            Progress::Tasks(tasks) => tasks.get_mut(self.current_task_index),
            Progress::History(_) => None,
        }
    }

    /// Whether a task is currently being worked on.
    pub fn has_open_task(&self) -> bool {
        self.active_task()
            .is_some_and(|t| !t.status.is_terminal())
    }

    /// True once the active task has finished, successfully or not.
    pub fn active_task_finished(&self) -> bool {
        self.active_task()
            .is_some_and(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed))
    }

    pub fn active_step(&self) -> Option<&Step> {
        self.active_task()
            .and_then(|t| t.steps.get(self.current_step_index))
    }

    pub fn active_step_mut(&mut self) -> Option<&mut Step> {
        let index = self.current_step_index;
        self.active_task_mut().and_then(|t| t.steps.get_mut(index))
    }
}
