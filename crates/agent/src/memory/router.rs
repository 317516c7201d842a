//! Memory router: picks the next memory node from the node that just ran.
//!
//! Pure function of the state and the budgets. This is the only place memory
//! routing policy lives.

use agentgraph_config::{AppConfig, MemoryRouting};
use agentgraph_core::agent::{GraphState, NodeId};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    pub max_graph_steps: u32,
    pub max_subgraph_steps: u32,
    pub routing: MemoryRouting,
}

impl RouterConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_graph_steps: config.graph.max_graph_steps,
            max_subgraph_steps: config.memory.max_subgraph_steps,
            routing: config.memory.routing,
        }
    }
}

/// Next node of the memory sub-graph. `subgraph_steps` counts memory nodes
/// already run in this pass.
pub fn route(state: &GraphState, subgraph_steps: u32, cfg: &RouterConfig) -> NodeId {
    if state.current_graph_step >= cfg.max_graph_steps {
        debug!(step = state.current_graph_step, "Graph budget exhausted, leaving memory sub-graph");
        return NodeId::EndSubgraph;
    }
    if subgraph_steps >= cfg.max_subgraph_steps {
        debug!(subgraph_steps, "Sub-graph budget exhausted");
        return NodeId::EndSubgraph;
    }
    if let Err(e) = state.memories.validate() {
        warn!(error = %e, "Memory state failed validation, skipping memory nodes");
        return NodeId::EndSubgraph;
    }

    match state.last_node {
        NodeId::Planner => NodeId::RetrieveMemory,
        NodeId::Agent | NodeId::Tools => match cfg.routing {
            MemoryRouting::StmThenRetrieve => NodeId::StmManager,
            MemoryRouting::RetrieveOnly => NodeId::RetrieveMemory,
        },
        NodeId::Verifier => NodeId::LtmManager,
        NodeId::StmManager | NodeId::LtmManager => NodeId::RetrieveMemory,
        NodeId::RetrieveMemory => NodeId::End,
        other => {
            warn!(last_node = %other, "No memory route for node");
            NodeId::EndSubgraph
        }
    }
}
