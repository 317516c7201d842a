//! Memory retrieval node.
//!
//! Queries the long-term store with the most recent short-term item and
//! caches hits that are not already represented in STM.

use std::sync::Arc;

use agentgraph_core::agent::{GraphState, NodeId};
use agentgraph_core::event::{DomainEvent, EventBus};
use agentgraph_core::memory::{LongTermStore, MemoryHit};
use chrono::Utc;
use tracing::{debug, warn};

use super::MemoryNodeUpdate;

/// The text to search with: newest STM item, else the last message.
pub fn retrieval_query(state: &GraphState) -> Option<String> {
    let query = match state.memories.stm.latest() {
        Some(item) => item.content.render(),
        None => state.last_message()?.content.clone(),
    };
    if query.trim().is_empty() { None } else { Some(query) }
}

pub struct MemoryRetriever {
    enabled: bool,
    limit: usize,
    max_graph_steps: u32,
    store: Option<Arc<dyn LongTermStore>>,
    event_bus: Option<Arc<EventBus>>,
}

impl MemoryRetriever {
    pub fn new(enabled: bool, limit: usize, max_graph_steps: u32) -> Self {
        Self {
            enabled,
            limit,
            max_graph_steps,
            store: None,
            event_bus: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn retrieve(&self, state: &GraphState) -> MemoryNodeUpdate {
        let unchanged = MemoryNodeUpdate::unchanged(NodeId::RetrieveMemory);
        if !self.enabled || state.current_graph_step >= self.max_graph_steps {
            return unchanged;
        }
        let Some(store) = &self.store else {
            return unchanged;
        };
        let Some(query) = retrieval_query(state) else {
            return unchanged;
        };

        let hits = match store
            .retrieve_similar_memories(&query, &state.user_id, &state.thread_id, self.limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, store = store.name(), "Memory retrieval failed");
                return unchanged;
            }
        };

        let fresh = drop_known_steps(state, hits);
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::MemoryAccessed {
                operation: "retrieve".into(),
                count: fresh.len(),
                timestamp: Utc::now(),
            });
        }
        if fresh.is_empty() {
            return unchanged;
        }

        let mut memories = state.memories.clone();
        let added = memories.ltm.merge(fresh);
        debug!(added, cached = memories.ltm.len(), "Recalled long-term memories");
        MemoryNodeUpdate::with_memories(NodeId::RetrieveMemory, memories)
    }
}

/// Hits from steps still in short-term memory add nothing new.
fn drop_known_steps(state: &GraphState, hits: Vec<MemoryHit>) -> Vec<MemoryHit> {
    let known = state.memories.stm.step_ids();
    hits.into_iter()
        .filter(|h| !known.contains(h.step_id.as_str()))
        .collect()
}
