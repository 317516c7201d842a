//! Memory sub-graph: short-term bookkeeping, long-term extraction and
//! retrieval, plus the router that decides which of them runs next.
//!
//! Memory nodes never fail the turn. A node that cannot do its work returns
//! an update that leaves the memories untouched.

pub mod ltm;
pub mod retrieval;
pub mod router;
pub mod stm;
pub mod subgraph;

use agentgraph_core::agent::{GraphState, NodeId};
use agentgraph_core::memory::Memories;
use agentgraph_core::plan::Progress;

pub use ltm::LtmManager;
pub use retrieval::MemoryRetriever;
pub use router::{route, RouterConfig};
pub use stm::StmManager;
pub use subgraph::MemorySubgraph;

/// What a memory node wants written back into the state.
#[derive(Debug, Clone)]
pub struct MemoryNodeUpdate {
    /// Replacement memories; `None` leaves them as they were.
    pub memories: Option<Memories>,
    pub last_node: NodeId,
    /// Task whose long-term facts were just extracted.
    pub memorized_task: Option<String>,
}

impl MemoryNodeUpdate {
    pub fn unchanged(node: NodeId) -> Self {
        Self {
            memories: None,
            last_node: node,
            memorized_task: None,
        }
    }

    pub fn with_memories(node: NodeId, memories: Memories) -> Self {
        Self {
            memories: Some(memories),
            last_node: node,
            memorized_task: None,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.memories.is_none() && self.memorized_task.is_none()
    }

    pub fn apply(self, state: &mut GraphState) {
        if let Some(memories) = self.memories {
            state.memories = memories;
        }
        state.last_node = self.last_node;
        if let (Some(task_id), Progress::Tasks(tasks)) = (self.memorized_task, &mut state.progress) {
            if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
                task.memorized = true;
            }
        }
    }
}
