//! Memory types and the long-term store capability.
//!
//! Two tiers:
//! - **Short-term** ([`ShortTermMemory`]): a fixed-capacity FIFO of recent step
//!   records that travels inside the graph state.
//! - **Long-term**: episodic and semantic facts persisted by an external
//!   [`LongTermStore`]. [`LongTermCache`] holds the hits retrieved for the
//!   current session; it is not the store of record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use crate::error::MemoryError;
use crate::plan::{HistoryItem, Step, ToolCallRecord};

// ── Short-term memory ──────────────────────────────────────────────────────

/// What a short-term memory item remembers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StmContent {
    Step(Step),
    History(HistoryItem),
}

impl StmContent {
    /// The free-text part (step thought or message content).
    pub fn text(&self) -> &str {
        match self {
            StmContent::Step(step) => &step.thought.text,
            StmContent::History(item) => &item.content,
        }
    }

    pub fn set_text(&mut self, text: String) {
        match self {
            StmContent::Step(step) => step.thought.text = text,
            StmContent::History(item) => item.content = text,
        }
    }

    pub fn tool_records(&self) -> &[ToolCallRecord] {
        match self {
            StmContent::Step(step) => &step.tool,
            StmContent::History(item) => &item.tool,
        }
    }

    pub fn tool_records_mut(&mut self) -> &mut Vec<ToolCallRecord> {
        match self {
            StmContent::Step(step) => &mut step.tool,
            StmContent::History(item) => &mut item.tool,
        }
    }

    /// Whether this item carries tool results rather than a plain message.
    pub fn has_tool_results(&self) -> bool {
        !self.tool_records().is_empty()
    }

    /// Flatten into the text used for token estimates, prompts and queries.
    pub fn render(&self) -> String {
        let mut out = self.text().to_string();
        for call in self.tool_records() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[{}] {}", call.name, call.result));
        }
        out
    }
}

/// One entry of the short-term buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmItem {
    pub content: StmContent,
    pub step_id: String,
    pub tokens: usize,
    pub inserted_at: DateTime<Utc>,
}

/// Fixed-capacity ordered buffer; the oldest item is evicted first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermMemory {
    items: VecDeque<StmItem>,
    max_size: usize,
}

impl ShortTermMemory {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Append an item, evicting from the front until `len <= max_size`.
    /// Returns the evicted items, oldest first.
    pub fn push(&mut self, item: StmItem) -> Vec<StmItem> {
        self.items.push_back(item);
        let mut evicted = Vec::new();
        while self.items.len() > self.max_size {
            if let Some(old) = self.items.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// The most recently inserted item.
    pub fn latest(&self) -> Option<&StmItem> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StmItem> {
        self.items.iter()
    }

    pub fn step_ids(&self) -> HashSet<&str> {
        self.items.iter().map(|i| i.step_id.as_str()).collect()
    }

    pub fn total_tokens(&self) -> usize {
        self.items.iter().map(|i| i.tokens).sum()
    }
}

// ── Long-term memory records ───────────────────────────────────────────────

/// A record of something that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicMemoryContext {
    pub user_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub step_id: String,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// A generalized fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMemoryContext {
    pub user_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub step_id: String,
    pub fact: String,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Episodic,
    Semantic,
}

/// A long-term record returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub score: f32,
}

/// Hits retrieved during this session, newest last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermCache {
    hits: Vec<MemoryHit>,
    max_size: usize,
}

impl LongTermCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            hits: Vec::new(),
            max_size,
        }
    }

    /// Merge new hits, skipping ids already cached. Oldest hits are dropped
    /// once the cache is full. Returns how many hits were added.
    pub fn merge(&mut self, hits: Vec<MemoryHit>) -> usize {
        let mut added = 0;
        for hit in hits {
            if self.hits.iter().any(|h| h.id == hit.id) {
                continue;
            }
            self.hits.push(hit);
            added += 1;
        }
        if self.hits.len() > self.max_size {
            let overflow = self.hits.len() - self.max_size;
            self.hits.drain(..overflow);
        }
        added
    }

    pub fn hits(&self) -> &[MemoryHit] {
        &self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Both memory tiers as carried by the graph state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memories {
    pub stm: ShortTermMemory,
    pub ltm: LongTermCache,
}

impl Memories {
    pub fn new(stm_max_size: usize, ltm_cache_size: usize) -> Self {
        Self {
            stm: ShortTermMemory::new(stm_max_size),
            ltm: LongTermCache::new(ltm_cache_size),
        }
    }

    /// Structural check used by the memory router before any memory node runs.
    ///
    /// A checkpoint edited by hand or written by an older build can violate
    /// these; the router ends the sub-graph instead of crashing the turn.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.stm.max_size == 0 {
            return Err(MemoryError::Validation("stm max_size is zero".into()));
        }
        if self.stm.len() > self.stm.max_size {
            return Err(MemoryError::Validation(format!(
                "stm holds {} items, capacity {}",
                self.stm.len(),
                self.stm.max_size
            )));
        }
        if let Some(item) = self.stm.iter().find(|i| i.step_id.is_empty()) {
            return Err(MemoryError::Validation(format!(
                "stm item inserted at {} has no step id",
                item.inserted_at
            )));
        }
        if self.ltm.len() > self.ltm.max_size {
            return Err(MemoryError::Validation(format!(
                "ltm cache holds {} hits, capacity {}",
                self.ltm.len(),
                self.ltm.max_size
            )));
        }
        if self.ltm.hits.iter().any(|h| h.id.is_empty()) {
            return Err(MemoryError::Validation("ltm hit without id".into()));
        }
        Ok(())
    }
}

impl Default for Memories {
    fn default() -> Self {
        Self::new(15, 20)
    }
}

// ── Store capability ───────────────────────────────────────────────────────

/// The external long-term store (typically a vector database).
#[async_trait]
pub trait LongTermStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "pgvector", "none").
    fn name(&self) -> &str;

    /// Persist extracted facts. Returns the number of records written.
    async fn upsert_memory(
        &self,
        semantic: Vec<SemanticMemoryContext>,
        episodic: Vec<EpisodicMemoryContext>,
    ) -> std::result::Result<usize, MemoryError>;

    /// Similarity search over one user's memories, best hits first.
    ///
    /// Memories are user-scoped: a hit may come from any of the user's
    /// threads. `thread_id` names the calling thread; backends may use it
    /// to rank or to partition, and the in-memory backend uses it to break
    /// score ties in favour of the current thread.
    async fn retrieve_similar_memories(
        &self,
        query: &str,
        user_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<MemoryHit>, MemoryError>;
}
