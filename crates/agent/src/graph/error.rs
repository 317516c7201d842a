use agentgraph_core::agent::GraphState;
use agentgraph_core::error::ToolError;
use thiserror::Error;

/// Errors that escape a graph run.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Rejected at construction; the graph never starts.
    #[error("Invalid graph configuration: {0}")]
    Config(String),

    /// A tool failed. `checkpoint` is the state as of the failure, so the
    /// caller can persist it and resume.
    #[error("Tool execution failed: {source}")]
    ToolExecution {
        #[source]
        source: ToolError,
        checkpoint: Box<GraphState>,
    },
}

impl GraphError {
    pub fn checkpoint(&self) -> Option<&GraphState> {
        match self {
            GraphError::ToolExecution { checkpoint, .. } => Some(checkpoint),
            GraphError::Config(_) => None,
        }
    }
}
