//! Top-level node bodies.
//!
//! Every node checks the graph step ceiling first, does its work, then bumps
//! `current_graph_step` and records itself as `last_node`.

use std::sync::Arc;

use agentgraph_config::AppConfig;
use agentgraph_core::agent::{ExecutionMode, GraphState, NodeId, RunStatus};
use agentgraph_core::event::{DomainEvent, EventBus};
use agentgraph_core::memory::Memories;
use agentgraph_core::message::{Message, Role};
use agentgraph_core::plan::{HistoryItem, Progress, Step, StepStatus, Task, TaskStatus};
use agentgraph_core::provider::ToolDefinition;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::error::GraphError;
use super::transitions::extract_final_answer;
use crate::context::accounting::{normalize_usage, TokenAccounting};
use crate::context::truncation::{Rung, TruncationLadder};
use crate::model::ModelHandle;
use crate::tool_executor::ToolExecutor;

pub const STEP_LIMIT_TEXT: &str = "Stopped: this thread has used its full step budget.";
pub const ITERATION_LIMIT_TEXT: &str =
    "Paused: the iteration limit for this run was reached. Send another message to continue.";

/// The assistant message appended when a budget stops the run.
pub fn stopped_message(text: &str, reason: &str) -> Message {
    Message::assistant(text)
        .with_metadata("stopped", serde_json::json!(reason))
}

/// Node-level settings taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub system_prompt: String,
    pub final_answer_marker: String,
    pub human_input_marker: String,
    pub max_retries: u32,
    pub max_plan_steps: usize,
    pub max_graph_steps: u32,
}

impl NodeSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            system_prompt: config.agent.system_prompt.clone(),
            final_answer_marker: config.agent.final_answer_marker.clone(),
            human_input_marker: config.agent.human_input_marker.clone(),
            max_retries: config.agent.max_retries,
            max_plan_steps: config.agent.max_plan_steps,
            max_graph_steps: config.graph.max_graph_steps,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanDraft {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    steps: Vec<StepDraft>,
}

#[derive(Debug, Deserialize)]
struct StepDraft {
    text: String,
    #[serde(default)]
    reasoning: String,
}

fn plan_schema(max_steps: usize) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "thought": { "type": "string" },
            "steps": {
                "type": "array",
                "minItems": 1,
                "maxItems": max_steps,
                "items": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "reasoning": { "type": "string" }
                    },
                    "required": ["text"]
                }
            }
        },
        "required": ["thought", "steps"]
    })
}

/// Format recalled memories into context blocks for the system prompt.
pub fn format_memory_context(memories: &Memories) -> String {
    let mut ctx = String::new();
    if !memories.stm.is_empty() {
        ctx.push_str("\n\n## Working Memory\n");
        for item in memories.stm.iter() {
            ctx.push_str(&format!("- {}\n", item.content.render()));
        }
    }
    if !memories.ltm.is_empty() {
        ctx.push_str("\n\n## Recalled Memories\n");
        for (i, hit) in memories.ltm.hits().iter().enumerate() {
            ctx.push_str(&format!("{}. [score={:.2}] {}\n", i + 1, hit.score, hit.content));
        }
    }
    ctx
}

pub struct Nodes {
    pub(crate) model: ModelHandle,
    pub(crate) ladder: TruncationLadder,
    pub(crate) tools: Vec<ToolDefinition>,
    pub(crate) executor: ToolExecutor,
    pub(crate) settings: NodeSettings,
    pub(crate) event_bus: Option<Arc<EventBus>>,
}

impl Nodes {
    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    fn finish(&self, state: &mut GraphState, node: NodeId) {
        state.current_graph_step += 1;
        state.last_node = node;
    }

    /// Stop the thread if the step ceiling is reached. Returns true if so.
    fn ceiling_reached(&self, state: &mut GraphState, node: NodeId) -> bool {
        if state.current_graph_step < self.settings.max_graph_steps {
            return false;
        }
        info!(
            node = %node,
            step = state.current_graph_step,
            max = self.settings.max_graph_steps,
            "Graph step ceiling reached"
        );
        state.push_message(stopped_message(STEP_LIMIT_TEXT, "step_limit"));
        state.status = RunStatus::StepLimitReached;
        state.last_node = node;
        true
    }

    fn fail(&self, state: &mut GraphState, context: &str, error: String) {
        warn!(context, error = %error, "Node failed");
        state.push_message(
            Message::assistant(format!("Error: {error}"))
                .with_metadata("error", serde_json::json!(true))
                .with_metadata("terminal", serde_json::json!(true)),
        );
        state.status = RunStatus::Failed;
        self.publish(DomainEvent::ErrorOccurred {
            context: context.to_string(),
            error_message: error,
            timestamp: Utc::now(),
        });
    }

    pub fn build_system_prompt(&self, state: &GraphState) -> String {
        let mut prompt = self.settings.system_prompt.clone();

        if let Some(task) = state.active_task() {
            prompt.push_str(&format!("\n\n## Current Task\n{}\n", task.thought));
            match state.active_step() {
                Some(step) => {
                    prompt.push_str(&format!(
                        "Step {} of {}: {}\n",
                        state.current_step_index + 1,
                        task.steps.len(),
                        step.thought.text
                    ));
                    if !step.thought.reasoning.is_empty() {
                        prompt.push_str(&format!("Why: {}\n", step.thought.reasoning));
                    }
                }
                None => prompt.push_str(&format!("Status: {:?}\n", task.status)),
            }
        }

        prompt.push_str(&format!(
            "\n\nWhen you have the answer, reply with \"{}: <answer>\".",
            self.settings.final_answer_marker
        ));
        if state.mode == ExecutionMode::Hybrid {
            prompt.push_str(&format!(
                " If you need a decision from the human operator, explain why and end with {}.",
                self.settings.human_input_marker
            ));
        }
        prompt.push_str(&format_memory_context(&state.memories));
        prompt
    }

    pub async fn agent(&self, state: &mut GraphState, accounting: &TokenAccounting) {
        if self.ceiling_reached(state, NodeId::Agent) {
            return;
        }

        if let Some(task) = state.active_task_mut() {
            if task.status == TaskStatus::Pending {
                start_task(task);
            }
        }
        if let Some(step) = state.active_step_mut() {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::InProgress;
            }
        }

        let mut request = Vec::with_capacity(state.messages.len() + 1);
        request.push(Message::system(self.build_system_prompt(state)));
        request.extend(state.messages.iter().cloned());

        debug!(
            thread_id = %state.thread_id,
            messages = request.len(),
            tools = self.tools.len(),
            "Calling model"
        );

        match self.ladder.invoke(&self.model, &request, &self.tools, accounting).await {
            Ok(outcome) => {
                let message = outcome
                    .message
                    .with_metadata("rung", serde_json::json!(outcome.rung.label()));
                let tokens_used = outcome
                    .response
                    .as_ref()
                    .and_then(normalize_usage)
                    .map(|u| u.total_tokens)
                    .unwrap_or(0);
                self.publish(DomainEvent::ResponseGenerated {
                    thread_id: state.thread_id.clone(),
                    model: self.model.model().to_string(),
                    tokens_used,
                    rung: outcome.rung.label(),
                    timestamp: Utc::now(),
                });
                if let Progress::History(items) = &mut state.progress {
                    items.push(HistoryItem::new(Role::Assistant, message.content.clone()));
                }
                if outcome.rung == Rung::Apology {
                    state.status = RunStatus::Failed;
                }
                state.push_message(message);
            }
            Err(e) => self.fail(state, "agent", e.to_string()),
        }

        self.finish(state, NodeId::Agent);
    }

    pub async fn tools(&self, state: &mut GraphState) -> Result<(), GraphError> {
        if self.ceiling_reached(state, NodeId::Tools) {
            return Ok(());
        }
        match self.executor.execute(state).await {
            Ok(report) => {
                debug!(executed = report.executions.len(), "Tool batch finished");
                self.finish(state, NodeId::Tools);
                Ok(())
            }
            Err(e) => {
                self.publish(DomainEvent::ErrorOccurred {
                    context: "tools".into(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(GraphError::ToolExecution {
                    source: e,
                    checkpoint: Box::new(state.clone()),
                })
            }
        }
    }

    /// Fold a final answer back into the context and keep the run going.
    pub fn verifier(&self, state: &mut GraphState) {
        if self.ceiling_reached(state, NodeId::Verifier) {
            return;
        }

        let answer = state
            .last_assistant()
            .and_then(|m| extract_final_answer(&m.content, &self.settings.final_answer_marker))
            .unwrap_or_default();

        let continuation = match state.active_step().map(|s| s.thought.text.clone()) {
            Some(step_text) if !answer.is_empty() => self.accept_step(state, &answer, &step_text),
            Some(step_text) => self.reject_step(state, &step_text),
            None if answer.is_empty() => {
                "Your final answer was empty. Continue working on the request.".to_string()
            }
            None => format!("Your final answer has been recorded: {answer}\nContinue with any remaining work."),
        };

        state.push_message(
            Message::user(continuation).with_metadata("continuation", serde_json::json!(true)),
        );
        self.finish(state, NodeId::Verifier);
    }

    fn accept_step(&self, state: &mut GraphState, answer: &str, step_text: &str) -> String {
        if let Some(step) = state.active_step_mut() {
            step.status = StepStatus::Completed;
            step.result = Some(answer.to_string());
        }
        state.retry = 0;
        state.current_step_index += 1;
        let index = state.current_step_index;

        let Some(task) = state.active_task_mut() else {
            return String::new();
        };
        info!(step = index, of = task.steps.len(), "Step accepted");
        if index < task.steps.len() {
            let next = &task.steps[index].thought.text;
            return format!("Step \"{step_text}\" is done: {answer}\nContinue with the next step: {next}");
        }
        if let Err(e) = task.transition(TaskStatus::Completed) {
            warn!(error = %e, "Could not complete task");
        }
        info!(task = %task.thought, "Task completed");
        format!("The task \"{}\" is complete. Final answer: {answer}\nContinue with any remaining work.", task.thought)
    }

    fn reject_step(&self, state: &mut GraphState, step_text: &str) -> String {
        state.retry += 1;
        if state.retry < self.settings.max_retries {
            debug!(retry = state.retry, "Final answer rejected");
            return format!("Your final answer was empty. Continue working on: {step_text}");
        }
        warn!(retry = state.retry, "Step failed after retries");
        if let Some(step) = state.active_step_mut() {
            step.status = StepStatus::Failed;
        }
        if let Some(task) = state.active_task_mut() {
            if let Err(e) = task.transition(TaskStatus::Failed) {
                warn!(error = %e, "Could not fail task");
            }
        }
        format!("The step \"{step_text}\" failed after {} attempts.", state.retry)
    }

    pub async fn planner(&self, state: &mut GraphState, accounting: &TokenAccounting) {
        if self.ceiling_reached(state, NodeId::Planner) {
            return;
        }

        let max_steps = self.settings.max_plan_steps;
        let mut messages = vec![Message::system(format!(
            "Break the user's request into at most {max_steps} concrete steps. \
             Give a one-sentence thought about the overall task and, for each step, \
             the text of the step and the reasoning behind it."
        ))];
        messages.extend(state.messages.iter().cloned());

        match self
            .model
            .invoke_structured::<PlanDraft>(messages, plan_schema(max_steps), accounting)
            .await
        {
            Ok(plan) if plan.steps.is_empty() => {
                warn!("Planner returned no steps, continuing without a task");
            }
            Ok(plan) => {
                let steps: Vec<Step> = plan
                    .steps
                    .into_iter()
                    .take(max_steps)
                    .map(|s| Step::new(s.text, s.reasoning))
                    .collect();
                let mut rendered = format!("Plan: {}\n", plan.thought);
                for (i, step) in steps.iter().enumerate() {
                    rendered.push_str(&format!("{}. {}\n", i + 1, step.thought.text));
                }
                info!(steps = steps.len(), "Planned task");

                state.push_task(Task::new(plan.thought, steps));
                if let Some(task) = state.active_task_mut() {
                    start_task(task);
                }
                state.push_message(
                    Message::assistant(rendered.trim_end()).with_metadata("plan", serde_json::json!(true)),
                );
            }
            Err(e) => self.fail(state, "planner", e.to_string()),
        }

        self.finish(state, NodeId::Planner);
    }

    pub fn human_input(&self, state: &mut GraphState) {
        info!(thread_id = %state.thread_id, "Waiting for human input");
        state.status = RunStatus::AwaitingHumanInput;
        state.last_node = NodeId::HumanInput;
        self.publish(DomainEvent::RunSuspended {
            thread_id: state.thread_id.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// Move a task into `InProgress`; a task in any other state is left as is.
fn start_task(task: &mut Task) {
    if let Err(e) = task.transition(TaskStatus::InProgress) {
        warn!(task = %task.thought, error = %e, "Could not start task");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{context_length_error, make_text_response, SequentialMockProvider};
    use agentgraph_core::error::ProviderError;
    use agentgraph_core::memory::{MemoryHit, MemoryKind};
    use agentgraph_core::tool::ToolRegistry;

    fn settings() -> NodeSettings {
        NodeSettings {
            system_prompt: "You are a trading assistant.".into(),
            final_answer_marker: "FINAL ANSWER".into(),
            human_input_marker: "WAITING_FOR_HUMAN_INPUT".into(),
            max_retries: 2,
            max_plan_steps: 2,
            max_graph_steps: 50,
        }
    }

    fn nodes(provider: Arc<SequentialMockProvider>) -> Nodes {
        Nodes {
            model: ModelHandle::select(provider, "m", 0.0),
            ladder: TruncationLadder::new(90_000, vec![4, 2]),
            tools: vec![],
            executor: ToolExecutor::new(Arc::new(ToolRegistry::new())),
            settings: settings(),
            event_bus: None,
        }
    }

    fn task_state(steps: &[&str]) -> GraphState {
        let mut state = GraphState::new("u1", ExecutionMode::Autonomous, Memories::default());
        state.push_message(Message::user("check prices"));
        let mut task = Task::new("prices", steps.iter().map(|s| Step::new(*s, "")).collect());
        task.transition(TaskStatus::InProgress).unwrap();
        state.push_task(task);
        state
    }

    #[tokio::test]
    async fn agent_appends_reply_and_counts_step() {
        let provider = Arc::new(SequentialMockProvider::single_text("FINAL ANSWER: 3100"));
        let nodes = nodes(provider.clone());
        let mut state = task_state(&["get ETH"]);

        nodes.agent(&mut state, &TokenAccounting::new()).await;
        let reply = state.last_message().unwrap();
        assert_eq!(reply.content, "FINAL ANSWER: 3100");
        assert_eq!(reply.metadata["rung"], "full");
        assert_eq!(state.current_graph_step, 1);
        assert_eq!(state.last_node, NodeId::Agent);
        assert_eq!(state.active_step().unwrap().status, StepStatus::InProgress);

        let system = &provider.requests()[0].messages[0];
        assert!(system.content.contains("Step 1 of 1: get ETH"));
    }

    #[tokio::test]
    async fn prompt_includes_recalled_memories() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let nodes = nodes(provider);
        let mut state = task_state(&["a"]);
        state.memories.ltm.merge(vec![MemoryHit {
            id: "m1".into(),
            kind: MemoryKind::Semantic,
            content: "User holds 2 ETH".into(),
            step_id: "old".into(),
            task_id: None,
            score: 0.91,
        }]);
        let prompt = nodes.build_system_prompt(&state);
        assert!(prompt.contains("## Recalled Memories"));
        assert!(prompt.contains("1. [score=0.91] User holds 2 ETH"));
    }

    #[tokio::test]
    async fn model_errors_become_terminal_messages() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let mut state = task_state(&["a"]);
        nodes(provider).agent(&mut state, &TokenAccounting::new()).await;
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.last_message().unwrap().flag("terminal"));
    }

    #[tokio::test]
    async fn apology_rung_fails_the_run() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![
            Err(context_length_error()),
            Err(context_length_error()),
            Err(context_length_error()),
        ]));
        let mut state = task_state(&["a"]);
        for i in 0..6 {
            state.push_message(Message::user(format!("filler {i}")));
        }
        nodes(provider).agent(&mut state, &TokenAccounting::new()).await;
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.last_message().unwrap().metadata["rung"], "apology");
    }

    #[tokio::test]
    async fn ceiling_stops_without_calling_the_model() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let nodes = nodes(provider.clone());
        let mut state = task_state(&["a"]);
        state.current_graph_step = 50;
        nodes.agent(&mut state, &TokenAccounting::new()).await;
        assert_eq!(state.status, RunStatus::StepLimitReached);
        assert_eq!(state.last_message().unwrap().content, STEP_LIMIT_TEXT);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn verifier_accepts_and_advances() {
        let nodes = nodes(Arc::new(SequentialMockProvider::new(vec![])));
        let mut state = task_state(&["first", "second"]);
        state.retry = 1;
        state.push_message(Message::assistant("FINAL ANSWER: done one"));

        nodes.verifier(&mut state);
        assert_eq!(state.current_step_index, 1);
        assert_eq!(state.retry, 0);
        let task = state.active_task().unwrap();
        assert_eq!(task.steps[0].status, StepStatus::Completed);
        assert_eq!(task.steps[0].result.as_deref(), Some("done one"));
        let continuation = state.last_message().unwrap();
        assert_eq!(continuation.role, Role::User);
        assert!(continuation.flag("continuation"));
        assert!(continuation.content.contains("second"));

        state.push_message(Message::assistant("FINAL ANSWER: done two"));
        nodes.verifier(&mut state);
        assert_eq!(state.active_task().unwrap().status, TaskStatus::Completed);
        assert!(state.active_task_finished());
    }

    #[test]
    fn verifier_rejects_empty_answers_until_retries_run_out() {
        let nodes = nodes(Arc::new(SequentialMockProvider::new(vec![])));
        let mut state = task_state(&["only"]);

        state.push_message(Message::assistant("FINAL ANSWER:"));
        nodes.verifier(&mut state);
        assert_eq!(state.retry, 1);
        assert_eq!(state.active_task().unwrap().status, TaskStatus::InProgress);

        state.push_message(Message::assistant("FINAL ANSWER:"));
        nodes.verifier(&mut state);
        assert_eq!(state.retry, 2);
        let task = state.active_task().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.steps[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn agent_starts_a_pending_task() {
        let provider = Arc::new(SequentialMockProvider::single_text("Looking up ETH."));
        let nodes = nodes(provider);
        let mut state = GraphState::new("u1", ExecutionMode::Autonomous, Memories::default());
        state.push_message(Message::user("check prices"));
        state.push_task(Task::new("prices", vec![Step::new("get ETH", "")]));

        nodes.agent(&mut state, &TokenAccounting::new()).await;
        assert_eq!(state.active_task().unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn starting_a_finished_task_leaves_it_alone() {
        let mut task = Task::new("prices", vec![Step::new("get ETH", "")]);
        start_task(&mut task);
        assert_eq!(task.status, TaskStatus::InProgress);

        task.transition(TaskStatus::Completed).unwrap();
        start_task(&mut task);
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn planner_creates_bounded_task() {
        let plan = r#"{"thought": "price report", "steps": [
            {"text": "get ETH", "reasoning": "base asset"},
            {"text": "get BTC"},
            {"text": "compare"}
        ]}"#;
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(plan)]));
        let nodes = nodes(provider.clone());
        let mut state = GraphState::new("u1", ExecutionMode::Autonomous, Memories::default());
        state.push_message(Message::user("report on prices"));

        nodes.planner(&mut state, &TokenAccounting::new()).await;
        let task = state.active_task().unwrap();
        assert_eq!(task.steps.len(), 2, "capped at max_plan_steps");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.steps[0].thought.reasoning, "base asset");
        assert!(state.last_message().unwrap().flag("plan"));
        assert_eq!(state.last_node, NodeId::Planner);
        assert!(provider.requests()[0].response_schema.is_some());
    }

    #[tokio::test]
    async fn empty_plan_continues_without_task() {
        let provider = Arc::new(SequentialMockProvider::single_text(r#"{"thought": "", "steps": []}"#));
        let mut state = GraphState::new("u1", ExecutionMode::Autonomous, Memories::default());
        nodes(provider).planner(&mut state, &TokenAccounting::new()).await;
        assert!(state.active_task().is_none());
        assert_eq!(state.status, RunStatus::Running);
    }

    #[test]
    fn human_input_suspends() {
        let bus = Arc::new(EventBus::new(4));
        let mut rx = bus.subscribe();
        let mut nodes = nodes(Arc::new(SequentialMockProvider::new(vec![])));
        nodes.event_bus = Some(bus);
        let mut state = task_state(&["a"]);
        nodes.human_input(&mut state);
        assert_eq!(state.status, RunStatus::AwaitingHumanInput);
        assert!(matches!(rx.try_recv().unwrap().as_ref(), DomainEvent::RunSuspended { .. }));
    }
}
