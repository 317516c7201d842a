//! The agent execution graph for agentgraph.
//!
//! A run moves through a small set of top-level nodes:
//!
//! 1. **Planner** (optional) turns the request into a task with steps
//! 2. **Agent** calls the model, stepping down the truncation ladder when the
//!    prompt is too large
//! 3. **Tools** executes requested tool calls and caps their results
//! 4. **Verifier** accepts final answers and feeds a continuation back in
//! 5. **Human input** suspends a hybrid run until an operator replies
//!
//! After each of the first four, the memory sub-graph records the turn in
//! short-term memory, extracts long-term facts from finished tasks and
//! recalls related memories for the next prompt.

pub mod context;
pub mod graph;
pub mod memory;
pub mod model;
pub mod tool_executor;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{normalize_usage, LadderOutcome, Rung, TokenAccounting, TokenTotals, TruncationLadder};
pub use graph::{route_top_level, AgentGraph, GraphError, RunOutcome, TransitionConfig};
pub use memory::{route as route_memory, LtmManager, MemoryNodeUpdate, MemoryRetriever, MemorySubgraph, RouterConfig, StmManager};
pub use model::ModelHandle;
pub use tool_executor::{ToolBatchReport, ToolExecution, ToolExecutor};
