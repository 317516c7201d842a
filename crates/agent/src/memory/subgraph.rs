//! The memory sub-graph loop.

use agentgraph_core::agent::{GraphState, NodeId};
use tracing::debug;

use super::ltm::LtmManager;
use super::retrieval::MemoryRetriever;
use super::router::{route, RouterConfig};
use super::stm::StmManager;
use crate::context::accounting::TokenAccounting;

pub struct MemorySubgraph {
    router: RouterConfig,
    stm: StmManager,
    ltm: LtmManager,
    retriever: MemoryRetriever,
}

impl MemorySubgraph {
    pub fn new(router: RouterConfig, stm: StmManager, ltm: LtmManager, retriever: MemoryRetriever) -> Self {
        Self {
            router,
            stm,
            ltm,
            retriever,
        }
    }

    /// Whether any memory tier is switched on.
    pub fn is_active(&self) -> bool {
        self.stm.is_enabled() || self.ltm.is_enabled() || self.retriever.is_enabled()
    }

    pub fn router_config(&self) -> &RouterConfig {
        &self.router
    }

    /// Run memory nodes after `trigger` until the router ends the pass.
    ///
    /// Every memory node counts against the graph budget. `last_node` is
    /// restored to `trigger` on exit. Returns the number of nodes run.
    pub async fn run(&self, state: &mut GraphState, trigger: NodeId, accounting: &TokenAccounting) -> u32 {
        state.last_node = trigger;
        let mut steps = 0;
        loop {
            let next = route(state, steps, &self.router);
            let update = match next {
                NodeId::StmManager => self.stm.process(state, accounting).await,
                NodeId::LtmManager => self.ltm.process(state, accounting).await,
                NodeId::RetrieveMemory => self.retriever.retrieve(state).await,
                _ => break,
            };
            update.apply(state);
            state.current_graph_step += 1;
            steps += 1;
            debug!(node = %next, graph_step = state.current_graph_step, "Memory node finished");
        }
        state.last_node = trigger;
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_config::{LongTermConfig, MemoryRouting, ShortTermConfig};
    use agentgraph_core::agent::ExecutionMode;
    use agentgraph_core::memory::Memories;
    use agentgraph_core::message::{Message, Role};
    use agentgraph_core::plan::{HistoryItem, Progress};

    fn subgraph(stm_enabled: bool, ltm_enabled: bool, max_graph_steps: u32) -> MemorySubgraph {
        MemorySubgraph::new(
            RouterConfig {
                max_graph_steps,
                max_subgraph_steps: 4,
                routing: MemoryRouting::StmThenRetrieve,
            },
            StmManager::new(ShortTermConfig { enabled: stm_enabled, ..Default::default() }, max_graph_steps),
            LtmManager::new(LongTermConfig::default(), ltm_enabled, max_graph_steps),
            MemoryRetriever::new(ltm_enabled, 5, max_graph_steps),
        )
    }

    fn reactive_state() -> GraphState {
        let mut state = GraphState::new("u1", ExecutionMode::Interactive, Memories::new(5, 5));
        state.push_message(Message::assistant("ETH is 3100"));
        if let Progress::History(items) = &mut state.progress {
            items.push(HistoryItem::new(Role::Assistant, "ETH is 3100"));
        }
        state
    }

    #[tokio::test]
    async fn agent_turn_runs_stm_then_retrieval() {
        let graph = subgraph(true, true, 100);
        let mut state = reactive_state();
        let steps = graph.run(&mut state, NodeId::Agent, &TokenAccounting::new()).await;
        assert_eq!(steps, 2);
        assert_eq!(state.current_graph_step, 2);
        assert_eq!(state.memories.stm.len(), 1);
        assert_eq!(state.last_node, NodeId::Agent);
    }

    #[tokio::test]
    async fn budget_stops_the_pass() {
        let graph = subgraph(true, true, 1);
        let mut state = reactive_state();
        let steps = graph.run(&mut state, NodeId::Agent, &TokenAccounting::new()).await;
        assert_eq!(steps, 1);
        assert_eq!(state.current_graph_step, 1);
    }

    #[tokio::test]
    async fn untriggered_nodes_run_nothing() {
        let graph = subgraph(true, true, 100);
        let mut state = reactive_state();
        let steps = graph.run(&mut state, NodeId::HumanInput, &TokenAccounting::new()).await;
        assert_eq!(steps, 0);
        assert_eq!(state.last_node, NodeId::HumanInput);
    }

    #[test]
    fn active_when_any_tier_enabled() {
        assert!(subgraph(true, false, 10).is_active());
        assert!(subgraph(false, true, 10).is_active());
        assert!(!subgraph(false, false, 10).is_active());
    }
}
