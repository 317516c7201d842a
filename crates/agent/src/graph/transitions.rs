//! Top-level transition function.
//!
//! Decides the next node from the state alone, so a checkpoint always
//! resumes on the same path.

use agentgraph_config::AppConfig;
use agentgraph_core::agent::{ExecutionMode, GraphState, NodeId, RunStatus};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct TransitionConfig {
    pub planning_enabled: bool,
    /// False for a text-only model; tool calls in its replies are ignored.
    pub supports_tools: bool,
    pub final_answer_marker: String,
    pub human_input_marker: String,
}

impl TransitionConfig {
    pub fn from_app_config(config: &AppConfig, supports_tools: bool) -> Self {
        Self {
            planning_enabled: config.agent.planning,
            supports_tools,
            final_answer_marker: config.agent.final_answer_marker.clone(),
            human_input_marker: config.agent.human_input_marker.clone(),
        }
    }
}

/// Case-insensitive marker search.
pub fn contains_marker(text: &str, marker: &str) -> bool {
    text.to_lowercase().contains(&marker.to_lowercase())
}

/// The answer text following the last final-answer marker, if the marker is
/// present. A separating colon is dropped.
pub fn extract_final_answer(text: &str, marker: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let start = lower.rfind(&marker.to_lowercase())? + marker.len();
    let rest = text.get(start..)?.trim_start();
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    Some(rest.trim().to_string())
}

pub fn route_top_level(state: &GraphState, cfg: &TransitionConfig) -> NodeId {
    if state.status.is_terminal() {
        return NodeId::End;
    }
    if state.status == RunStatus::AwaitingHumanInput {
        return NodeId::HumanInput;
    }

    match state.last_node {
        NodeId::Start => {
            if cfg.planning_enabled
                && state.mode != ExecutionMode::Interactive
                && !state.has_open_task()
            {
                NodeId::Planner
            } else {
                NodeId::Agent
            }
        }
        NodeId::Agent => after_agent(state, cfg),
        NodeId::Tools | NodeId::Verifier | NodeId::Planner | NodeId::HumanInput => NodeId::Agent,
        NodeId::End => NodeId::End,
        other => {
            warn!(last_node = %other, "Memory node left as last_node, ending run");
            NodeId::End
        }
    }
}

fn after_agent(state: &GraphState, cfg: &TransitionConfig) -> NodeId {
    let Some(reply) = state.last_assistant() else {
        return NodeId::End;
    };
    if cfg.supports_tools && reply.has_tool_calls() {
        return NodeId::Tools;
    }
    if state.mode == ExecutionMode::Hybrid && contains_marker(&reply.content, &cfg.human_input_marker) {
        return NodeId::HumanInput;
    }
    let interactive = state.mode == ExecutionMode::Interactive;
    if contains_marker(&reply.content, &cfg.final_answer_marker) {
        return if interactive { NodeId::End } else { NodeId::Verifier };
    }
    if interactive { NodeId::End } else { NodeId::Agent }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_tool_call;
    use agentgraph_core::memory::Memories;
    use agentgraph_core::message::Message;
    use agentgraph_core::plan::{Step, Task};

    fn cfg() -> TransitionConfig {
        TransitionConfig {
            planning_enabled: true,
            supports_tools: true,
            final_answer_marker: "FINAL ANSWER".into(),
            human_input_marker: "WAITING_FOR_HUMAN_INPUT".into(),
        }
    }

    fn after_reply(mode: ExecutionMode, reply: Message) -> GraphState {
        let mut state = GraphState::new("u1", mode, Memories::default());
        state.push_message(Message::user("hi"));
        state.push_message(reply);
        state.last_node = NodeId::Agent;
        state
    }

    #[test]
    fn start_goes_to_planner_only_when_useful() {
        let state = GraphState::new("u1", ExecutionMode::Autonomous, Memories::default());
        assert_eq!(route_top_level(&state, &cfg()), NodeId::Planner);

        let interactive = GraphState::new("u1", ExecutionMode::Interactive, Memories::default());
        assert_eq!(route_top_level(&interactive, &cfg()), NodeId::Agent);

        let mut with_task = state.clone();
        with_task.push_task(Task::new("t", vec![Step::new("s", "")]));
        assert_eq!(route_top_level(&with_task, &cfg()), NodeId::Agent);

        let no_planning = TransitionConfig { planning_enabled: false, ..cfg() };
        assert_eq!(route_top_level(&state, &no_planning), NodeId::Agent);
    }

    #[test]
    fn tool_calls_go_to_tools_unless_text_only() {
        let mut reply = Message::assistant("");
        reply.tool_calls.push(make_tool_call("get_price", serde_json::json!({})));
        let state = after_reply(ExecutionMode::Interactive, reply);
        assert_eq!(route_top_level(&state, &cfg()), NodeId::Tools);

        let text_only = TransitionConfig { supports_tools: false, ..cfg() };
        assert_eq!(route_top_level(&state, &text_only), NodeId::End);
    }

    #[test]
    fn final_answer_depends_on_mode() {
        let reply = || Message::assistant("FINAL ANSWER: 42");
        assert_eq!(
            route_top_level(&after_reply(ExecutionMode::Interactive, reply()), &cfg()),
            NodeId::End
        );
        assert_eq!(
            route_top_level(&after_reply(ExecutionMode::Autonomous, reply()), &cfg()),
            NodeId::Verifier
        );
        assert_eq!(
            route_top_level(&after_reply(ExecutionMode::Hybrid, reply()), &cfg()),
            NodeId::Verifier
        );
    }

    #[test]
    fn plain_reply_ends_interactive_turns_only() {
        let reply = || Message::assistant("still thinking");
        assert_eq!(
            route_top_level(&after_reply(ExecutionMode::Interactive, reply()), &cfg()),
            NodeId::End
        );
        assert_eq!(
            route_top_level(&after_reply(ExecutionMode::Autonomous, reply()), &cfg()),
            NodeId::Agent
        );
    }

    #[test]
    fn human_marker_only_in_hybrid() {
        let reply = || Message::assistant("Need approval. WAITING_FOR_HUMAN_INPUT");
        assert_eq!(
            route_top_level(&after_reply(ExecutionMode::Hybrid, reply()), &cfg()),
            NodeId::HumanInput
        );
        assert_eq!(
            route_top_level(&after_reply(ExecutionMode::Autonomous, reply()), &cfg()),
            NodeId::Agent
        );
    }

    #[test]
    fn statuses_override_last_node() {
        let mut state = after_reply(ExecutionMode::Autonomous, Message::assistant("x"));
        state.status = RunStatus::StepLimitReached;
        assert_eq!(route_top_level(&state, &cfg()), NodeId::End);
        state.status = RunStatus::AwaitingHumanInput;
        assert_eq!(route_top_level(&state, &cfg()), NodeId::HumanInput);
    }

    #[test]
    fn everything_else_returns_to_agent() {
        for node in [NodeId::Tools, NodeId::Verifier, NodeId::Planner, NodeId::HumanInput] {
            let mut state = GraphState::new("u1", ExecutionMode::Autonomous, Memories::default());
            state.last_node = node;
            assert_eq!(route_top_level(&state, &cfg()), NodeId::Agent, "after {node}");
        }
    }

    #[test]
    fn final_answer_extraction() {
        assert_eq!(
            extract_final_answer("Done. FINAL ANSWER: 3100 USD", "FINAL ANSWER").as_deref(),
            Some("3100 USD")
        );
        assert_eq!(extract_final_answer("final answer:   ", "FINAL ANSWER").as_deref(), Some(""));
        assert_eq!(extract_final_answer("no marker here", "FINAL ANSWER"), None);
    }
}
