//! No-op long-term store — disables persistent memory entirely.

use async_trait::async_trait;
use agentgraph_core::error::MemoryError;
use agentgraph_core::memory::{EpisodicMemoryContext, LongTermStore, MemoryHit, SemanticMemoryContext};

/// A long-term store that stores nothing and finds nothing.
pub struct NoopLongTermStore;

#[async_trait]
impl LongTermStore for NoopLongTermStore {
    fn name(&self) -> &str { "none" }

    async fn upsert_memory(
        &self,
        _semantic: Vec<SemanticMemoryContext>,
        _episodic: Vec<EpisodicMemoryContext>,
    ) -> Result<usize, MemoryError> {
        Ok(0)
    }

    async fn retrieve_similar_memories(
        &self,
        _query: &str,
        _user_id: &str,
        _thread_id: &str,
        _limit: usize,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        Ok(Vec::new())
    }
}
