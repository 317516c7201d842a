//! `agentgraph inspect` / `agentgraph route` — read a checkpoint file.
//!
//! A checkpoint is the JSON form of a [`GraphState`], as returned by a run
//! or carried in a tool-execution error.

use std::fmt::Write as _;
use std::path::Path;

use agentgraph_agent::{route_memory, route_top_level, RouterConfig, TransitionConfig};
use agentgraph_config::AppConfig;
use agentgraph_core::agent::{GraphState, NodeId};
use agentgraph_core::plan::Progress;
use agentgraph_core::{Error, Result};
use tracing::debug;

pub fn load(path: &Path) -> Result<GraphState> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Internal(format!("Failed to read {}: {e}", path.display())))?;
    let state: GraphState = serde_json::from_str(&content)
        .map_err(|e| Error::Internal(format!("{} is not a graph checkpoint: {e}", path.display())))?;
    debug!(thread_id = %state.thread_id, messages = state.messages.len(), "Loaded checkpoint");
    Ok(state)
}

pub fn inspect(path: &Path) -> Result<()> {
    let state = load(path)?;
    print!("{}", summarize(&state));
    Ok(())
}

pub fn route(path: &Path) -> Result<()> {
    let state = load(path)?;
    let config = AppConfig::load()?;
    let (top, memory) = next_nodes(&state, &config);
    println!("last node:        {}", state.last_node);
    println!("status:           {:?}", state.status);
    println!("next node:        {top}");
    println!("memory sub-graph: {memory}");
    Ok(())
}

/// The node a run would enter next, and the first memory node if the
/// sub-graph were triggered from the checkpoint's last node.
pub fn next_nodes(state: &GraphState, config: &AppConfig) -> (NodeId, NodeId) {
    let transitions = TransitionConfig::from_app_config(config, true);
    let router = RouterConfig::from_app_config(config);
    (route_top_level(state, &transitions), route_memory(state, 0, &router))
}

pub fn summarize(state: &GraphState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "thread:      {}", state.thread_id);
    let _ = writeln!(out, "user:        {}", state.user_id);
    let _ = writeln!(out, "mode:        {:?}", state.mode);
    let _ = writeln!(out, "status:      {:?}", state.status);
    let _ = writeln!(out, "last node:   {}", state.last_node);
    let _ = writeln!(out, "graph steps: {}", state.current_graph_step);
    let _ = writeln!(out, "messages:    {}", state.messages.len());

    match &state.progress {
        Progress::Tasks(tasks) => {
            let _ = writeln!(out, "\ntasks ({}):", tasks.len());
            for task in tasks {
                out.push_str(&task.format_history());
            }
        }
        Progress::History(items) => {
            let _ = writeln!(out, "\nhistory items: {}", items.len());
        }
    }

    let stm = &state.memories.stm;
    let _ = writeln!(out, "\nshort-term memory ({}/{}):", stm.len(), stm.max_size());
    for item in stm.iter() {
        let _ = writeln!(out, "  [{}] ~{} tokens", item.step_id, item.tokens);
    }
    let ltm = state.memories.ltm.hits();
    let _ = writeln!(out, "long-term cache: {} hits", ltm.len());
    for hit in ltm {
        let _ = writeln!(out, "  [score={:.2}] {}", hit.score, hit.content);
    }
    out
}
