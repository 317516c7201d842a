//! The agent execution graph.
//!
//! Top-level nodes are plain methods; which one runs next is decided by
//! [`route_top_level`] from the state alone. The memory sub-graph runs after
//! every planner, agent, tools and verifier node.

pub mod error;
pub mod nodes;
pub mod runner;
pub mod transitions;

pub use error::GraphError;
pub use nodes::{format_memory_context, NodeSettings};
pub use runner::{AgentGraph, RunOutcome};
pub use transitions::{contains_marker, extract_final_answer, route_top_level, TransitionConfig};
