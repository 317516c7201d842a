//! The graph runner: walks top-level nodes until the run ends, suspends or
//! hits the per-invocation iteration cap.

use std::sync::Arc;

use agentgraph_config::AppConfig;
use agentgraph_core::agent::{GraphState, NodeId, RunStatus};
use agentgraph_core::event::{DomainEvent, EventBus};
use agentgraph_core::memory::{LongTermStore, Memories};
use agentgraph_core::message::Message;
use agentgraph_core::provider::Provider;
use agentgraph_core::tool::ToolRegistry;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::error::GraphError;
use super::nodes::{stopped_message, NodeSettings, Nodes, ITERATION_LIMIT_TEXT};
use super::transitions::{route_top_level, TransitionConfig};
use crate::context::accounting::TokenAccounting;
use crate::context::truncation::TruncationLadder;
use crate::memory::{LtmManager, MemoryRetriever, MemorySubgraph, RouterConfig, StmManager};
use crate::model::ModelHandle;
use crate::tool_executor::ToolExecutor;

/// How a run handed control back.
#[derive(Debug)]
pub enum RunOutcome {
    /// The graph reached `End`. The status says why (completed, failed,
    /// step limit).
    Completed(GraphState),
    /// Suspended at the human-input node.
    AwaitingInput(GraphState),
    /// The per-invocation cap was hit; the state can be resumed.
    IterationLimitReached(GraphState),
}

impl RunOutcome {
    pub fn state(&self) -> &GraphState {
        match self {
            RunOutcome::Completed(s) | RunOutcome::AwaitingInput(s) | RunOutcome::IterationLimitReached(s) => s,
        }
    }

    pub fn into_state(self) -> GraphState {
        match self {
            RunOutcome::Completed(s) | RunOutcome::AwaitingInput(s) | RunOutcome::IterationLimitReached(s) => s,
        }
    }
}

pub struct AgentGraph {
    config: AppConfig,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    store: Option<Arc<dyn LongTermStore>>,
    summarizer: Option<Arc<dyn Provider>>,
    event_bus: Option<Arc<EventBus>>,
    transitions: TransitionConfig,
    nodes: Nodes,
    memory: MemorySubgraph,
}

impl AgentGraph {
    /// Build a graph. The configuration is validated and the model's
    /// capabilities are checked here, once.
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Result<Self, GraphError> {
        config.validate().map_err(|e| GraphError::Config(e.to_string()))?;

        let model = main_model(&provider, config);
        if config.agent.planning && !model.supports_structured_output() {
            return Err(GraphError::Config(format!(
                "planning needs structured output, which provider '{}' does not support",
                provider.name()
            )));
        }
        if !model.supports_tools() && !registry.is_empty() {
            warn!(
                provider = provider.name(),
                tools = registry.len(),
                "Provider cannot call tools; registered tools will not be offered"
            );
        }

        let transitions = TransitionConfig::from_app_config(config, model.supports_tools());
        let (nodes, memory) = assemble(config, &provider, &registry, None, None, None);
        info!(
            model = %model.model(),
            mode = ?config.agent.mode,
            tools = registry.len(),
            "Agent graph ready"
        );

        Ok(Self {
            config: config.clone(),
            provider,
            registry,
            store: None,
            summarizer: None,
            event_bus: None,
            transitions,
            nodes,
            memory,
        })
    }

    pub fn with_long_term_store(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.store = Some(store);
        self.reassemble();
        self
    }

    /// Use a separate provider for STM summaries (by default the main
    /// provider is asked for the configured summarization model).
    pub fn with_summarizer(mut self, provider: Arc<dyn Provider>) -> Self {
        self.summarizer = Some(provider);
        self.reassemble();
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self.reassemble();
        self
    }

    fn reassemble(&mut self) {
        let (nodes, memory) = assemble(
            &self.config,
            &self.provider,
            &self.registry,
            self.store.clone(),
            self.summarizer.clone(),
            self.event_bus.clone(),
        );
        self.nodes = nodes;
        self.memory = memory;
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// A fresh thread state sized from the configuration.
    pub fn new_state(&self, user_id: impl Into<String>) -> GraphState {
        let memories = Memories::new(
            self.config.memory.short_term.max_size,
            self.config.memory.long_term.cache_size,
        );
        GraphState::new(user_id, self.config.agent.mode, memories)
    }

    /// Start a new turn with a user message.
    ///
    /// Finished and paused threads are reopened. A thread that hit the step
    /// ceiling stays stopped.
    pub async fn run_turn(
        &self,
        mut state: GraphState,
        user_message: impl Into<String>,
        accounting: &TokenAccounting,
    ) -> Result<RunOutcome, GraphError> {
        match state.status {
            RunStatus::Completed | RunStatus::Failed | RunStatus::IterationLimitReached | RunStatus::Running => {
                state.status = RunStatus::Running;
                state.last_node = NodeId::Start;
            }
            RunStatus::AwaitingHumanInput => {
                state.status = RunStatus::Running;
                state.last_node = NodeId::HumanInput;
            }
            RunStatus::StepLimitReached => {}
        }
        state.push_message(Message::user(user_message));
        self.run(state, accounting).await
    }

    /// Continue a thread suspended at the human-input node.
    pub async fn resume_with_input(
        &self,
        mut state: GraphState,
        input: impl Into<String>,
        accounting: &TokenAccounting,
    ) -> Result<RunOutcome, GraphError> {
        if state.status != RunStatus::AwaitingHumanInput {
            warn!(status = ?state.status, "Resuming a thread that was not waiting for input");
        }
        state.push_message(Message::user(input).with_metadata("human_input", serde_json::json!(true)));
        if !state.status.is_terminal() {
            state.status = RunStatus::Running;
        }
        state.last_node = NodeId::HumanInput;
        self.run(state, accounting).await
    }

    /// Walk the graph from the state's current position.
    pub async fn run(
        &self,
        mut state: GraphState,
        accounting: &TokenAccounting,
    ) -> Result<RunOutcome, GraphError> {
        if state.status == RunStatus::IterationLimitReached {
            state.status = RunStatus::Running;
        }
        let max_iterations = self.config.agent.max_iterations;
        let mut iterations = 0u32;

        loop {
            if state.status == RunStatus::AwaitingHumanInput {
                return Ok(RunOutcome::AwaitingInput(state));
            }

            let next = route_top_level(&state, &self.transitions);
            if next == NodeId::End {
                if state.status == RunStatus::Running {
                    state.status = RunStatus::Completed;
                }
                info!(
                    thread_id = %state.thread_id,
                    status = ?state.status,
                    graph_steps = state.current_graph_step,
                    "Run finished"
                );
                return Ok(RunOutcome::Completed(state));
            }

            if iterations >= max_iterations {
                info!(iterations, "Iteration limit reached");
                state.push_message(stopped_message(ITERATION_LIMIT_TEXT, "iteration_limit"));
                state.status = RunStatus::IterationLimitReached;
                return Ok(RunOutcome::IterationLimitReached(state));
            }
            iterations += 1;

            debug!(node = %next, iteration = iterations, "Entering node");
            match next {
                NodeId::Planner => self.nodes.planner(&mut state, accounting).await,
                NodeId::Agent => self.nodes.agent(&mut state, accounting).await,
                NodeId::Tools => self.nodes.tools(&mut state).await?,
                NodeId::Verifier => self.nodes.verifier(&mut state),
                NodeId::HumanInput => self.nodes.human_input(&mut state),
                other => {
                    warn!(node = %other, "Not a top-level node, ending run");
                    state.status = RunStatus::Failed;
                    continue;
                }
            }

            if let Some(bus) = &self.event_bus {
                bus.publish(DomainEvent::NodeCompleted {
                    thread_id: state.thread_id.clone(),
                    node: next,
                    graph_step: state.current_graph_step,
                    timestamp: Utc::now(),
                });
            }

            let remembers = matches!(
                next,
                NodeId::Planner | NodeId::Agent | NodeId::Tools | NodeId::Verifier
            );
            if remembers && self.memory.is_active() && !state.status.is_terminal() {
                self.memory.run(&mut state, next, accounting).await;
            }
        }
    }
}

fn main_model(provider: &Arc<dyn Provider>, config: &AppConfig) -> ModelHandle {
    ModelHandle::select(provider.clone(), config.agent.model.clone(), config.agent.temperature)
        .with_max_tokens(config.agent.max_tokens)
}

/// Wire node bodies and memory managers from the configuration.
fn assemble(
    config: &AppConfig,
    provider: &Arc<dyn Provider>,
    registry: &Arc<ToolRegistry>,
    store: Option<Arc<dyn LongTermStore>>,
    summarizer: Option<Arc<dyn Provider>>,
    event_bus: Option<Arc<EventBus>>,
) -> (Nodes, MemorySubgraph) {
    let model = main_model(provider, config);
    let max_graph_steps = config.graph.max_graph_steps;

    let mut executor = ToolExecutor::new(registry.clone())
        .with_limits(config.tools.max_result_chars, config.tools.max_arg_log_chars);
    if let Some(bus) = &event_bus {
        executor = executor.with_event_bus(bus.clone());
    }
    let tools = if model.supports_tools() {
        registry.definitions()
    } else {
        Vec::new()
    };
    let nodes = Nodes {
        model: model.clone(),
        ladder: TruncationLadder::new(
            config.truncation.token_ceiling,
            config.truncation.recent_windows.clone(),
        ),
        tools,
        executor,
        settings: NodeSettings::from_app_config(config),
        event_bus: event_bus.clone(),
    };

    let summarizer_provider = summarizer.unwrap_or_else(|| provider.clone());
    let stm = StmManager::new(config.memory.short_term.clone(), max_graph_steps).with_summarizer(
        ModelHandle::select(summarizer_provider, config.agent.summarization_model.clone(), 0.0),
    );
    let mut ltm = LtmManager::new(config.memory.long_term.clone(), config.memory.enabled, max_graph_steps)
        .with_model(model);
    let mut retriever = MemoryRetriever::new(
        config.memory.enabled,
        config.memory.long_term.retrieval_limit,
        max_graph_steps,
    );
    if let Some(store) = store {
        ltm = ltm.with_store(store.clone());
        retriever = retriever.with_store(store);
    }
    if let Some(bus) = event_bus {
        ltm = ltm.with_event_bus(bus.clone());
        retriever = retriever.with_event_bus(bus);
    }
    let memory = MemorySubgraph::new(RouterConfig::from_app_config(config), stm, ltm, retriever);

    (nodes, memory)
}
