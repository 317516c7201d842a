//! Similarity and rank-fusion utilities for long-term memory search.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity over embeddings
//! - Keyword overlap scoring (no embeddings needed)
//! - Reciprocal Rank Fusion (RRF) for merging ranked hit lists

use agentgraph_core::memory::MemoryHit;
use std::collections::{HashMap, HashSet};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the vectors differ in length or are empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Fraction of the query's terms (three characters or longer) that appear
/// in `content`. Returns 0.0 for a query with no usable terms.
pub fn keyword_overlap(query: &str, content: &str) -> f32 {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms = terms(content);
    let matched = query_terms.intersection(&content_terms).count();
    matched as f32 / query_terms.len() as f32
}

/// Reciprocal Rank Fusion: merge two ranked hit lists.
///
/// Each hit's final score = sum of 1/(k + rank) across both lists.
/// Standard value is k=60. Results are deduplicated by hit id.
pub fn reciprocal_rank_fusion(
    keyword_results: &[MemoryHit],
    vector_results: &[MemoryHit],
    k: u32,
    limit: usize,
) -> Vec<MemoryHit> {
    let k = k as f32;
    let mut scores: HashMap<String, (f32, MemoryHit)> = HashMap::new();

    for list in [keyword_results, vector_results] {
        for (rank, hit) in list.iter().enumerate() {
            let rrf_score = 1.0 / (k + rank as f32 + 1.0);
            scores
                .entry(hit.id.clone())
                .and_modify(|(score, _)| *score += rrf_score)
                .or_insert_with(|| (rrf_score, hit.clone()));
        }
    }

    let mut results: Vec<MemoryHit> = scores
        .into_values()
        .map(|(score, mut hit)| {
            hit.score = score;
            hit
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}
