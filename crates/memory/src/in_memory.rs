//! In-memory long-term store — useful for testing and single-process runs.
//!
//! Records are scoped by user. Ranking is keyword overlap; when an embedding
//! provider is attached, embedding similarity is ranked as well and the two
//! lists are fused with RRF.

use async_trait::async_trait;
use agentgraph_core::error::MemoryError;
use agentgraph_core::memory::{
    EpisodicMemoryContext, LongTermStore, MemoryHit, MemoryKind, SemanticMemoryContext,
};
use agentgraph_core::provider::{EmbeddingRequest, Provider};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::vector::{cosine_similarity, keyword_overlap, reciprocal_rank_fusion};

/// RRF constant used when fusing keyword and embedding rankings.
const RRF_K: u32 = 60;

struct StoredMemory {
    hit: MemoryHit,
    user_id: String,
    run_id: String,
    embedding: Option<Vec<f32>>,
}

/// A long-term store that keeps records in a Vec.
pub struct InMemoryLongTermStore {
    records: Arc<RwLock<Vec<StoredMemory>>>,
    embedder: Option<(Arc<dyn Provider>, String)>,
}

impl InMemoryLongTermStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            embedder: None,
        }
    }

    /// Rank by embedding similarity too, using `provider.embed()` with `model`.
    pub fn with_embeddings(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.embedder = Some((provider, model.into()));
        self
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    async fn embed(&self, inputs: Vec<String>) -> Option<Vec<Vec<f32>>> {
        let (provider, model) = self.embedder.as_ref()?;
        let expected = inputs.len();
        match provider
            .embed(EmbeddingRequest {
                model: model.clone(),
                inputs,
            })
            .await
        {
            Ok(resp) if resp.embeddings.len() == expected => Some(resp.embeddings),
            Ok(resp) => {
                warn!(
                    expected,
                    got = resp.embeddings.len(),
                    "Embedding count mismatch; ranking by keywords only"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "Embedding failed; ranking by keywords only");
                None
            }
        }
    }
}

impl Default for InMemoryLongTermStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LongTermStore for InMemoryLongTermStore {
    fn name(&self) -> &str { "in_memory" }

    async fn upsert_memory(
        &self,
        semantic: Vec<SemanticMemoryContext>,
        episodic: Vec<EpisodicMemoryContext>,
    ) -> Result<usize, MemoryError> {
        let mut incoming: Vec<StoredMemory> = Vec::with_capacity(semantic.len() + episodic.len());

        for fact in semantic {
            incoming.push(StoredMemory {
                hit: MemoryHit {
                    id: Uuid::new_v4().to_string(),
                    kind: MemoryKind::Semantic,
                    content: format!("[{}] {}", fact.category, fact.fact),
                    step_id: fact.step_id,
                    task_id: fact.task_id,
                    score: 0.0,
                },
                user_id: fact.user_id,
                run_id: fact.run_id,
                embedding: None,
            });
        }
        for episode in episodic {
            incoming.push(StoredMemory {
                hit: MemoryHit {
                    id: Uuid::new_v4().to_string(),
                    kind: MemoryKind::Episodic,
                    content: episode.content,
                    step_id: episode.step_id,
                    task_id: episode.task_id,
                    score: 0.0,
                },
                user_id: episode.user_id,
                run_id: episode.run_id,
                embedding: None,
            });
        }

        if incoming.is_empty() {
            return Ok(0);
        }

        let texts = incoming.iter().map(|r| r.hit.content.clone()).collect();
        if let Some(embeddings) = self.embed(texts).await {
            for (record, embedding) in incoming.iter_mut().zip(embeddings) {
                record.embedding = Some(embedding);
            }
        }

        let written = incoming.len();
        let mut records = self.records.write().await;
        for record in incoming {
            // Same user, kind and content: refresh in place, keep the id.
            if let Some(existing) = records.iter_mut().find(|r| {
                r.user_id == record.user_id
                    && r.hit.kind == record.hit.kind
                    && r.hit.content == record.hit.content
            }) {
                let id = existing.hit.id.clone();
                *existing = record;
                existing.hit.id = id;
            } else {
                records.push(record);
            }
        }
        debug!(written, total = records.len(), "Upserted long-term memories");
        Ok(written)
    }

    async fn retrieve_similar_memories(
        &self,
        query: &str,
        user_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embed(vec![query.to_string()])
            .await
            .and_then(|mut v| v.pop());

        let records = self.records.read().await;
        let scoped: Vec<&StoredMemory> = records.iter().filter(|r| r.user_id == user_id).collect();

        // Every thread of the user is searched; ties go to the current thread.
        let rank = |mut scored: Vec<(f32, &StoredMemory)>| -> Vec<MemoryHit> {
            scored.retain(|(score, _)| *score > 0.0);
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| (b.1.run_id == thread_id).cmp(&(a.1.run_id == thread_id)))
            });
            scored
                .into_iter()
                .take(limit)
                .map(|(score, r)| MemoryHit { score, ..r.hit.clone() })
                .collect()
        };

        let keyword_hits = rank(
            scoped
                .iter()
                .map(|r| (keyword_overlap(query, &r.hit.content), *r))
                .collect(),
        );

        let Some(query_embedding) = query_embedding else {
            return Ok(keyword_hits);
        };

        let vector_hits = rank(
            scoped
                .iter()
                .filter_map(|r| {
                    let emb = r.embedding.as_ref()?;
                    Some((cosine_similarity(emb, &query_embedding), *r))
                })
                .collect(),
        );

        Ok(reciprocal_rank_fusion(&keyword_hits, &vector_hits, RRF_K, limit))
    }
}
