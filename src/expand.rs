//! Context Expander (§4.7): adds supporting chunks around what the
//! reranker selected. Two DB-backed strategies plus one free (candidate
//! pool only) strategy; the caller decides which to run based on rerank
//! outcome.

use crate::search::client::HybridSearchClient;
use crate::types::RetrievalHit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionStrategy {
    /// chunkIndex metadata present and (list mode detected or zero entailment).
    OrderedNeighbors,
    /// Fallback, or ordered expansion added nothing.
    SimilarityWalk,
    /// No DB round-trip: merge ±radius neighbors already in the candidate pool.
    LocalNeighborsOnly,
    None,
}

pub fn decide_strategy(list_mode: bool, zero_entailment: bool, has_chunk_index: bool) -> ExpansionStrategy {
    if has_chunk_index && (list_mode || zero_entailment) {
        ExpansionStrategy::OrderedNeighbors
    } else if zero_entailment {
        ExpansionStrategy::SimilarityWalk
    } else {
        ExpansionStrategy::None
    }
}

/// Request up to `max_new` subsequent indices per source beyond the current
/// max selected index, bounded by `totalChunks`.
pub async fn expand_ordered(
    client: &HybridSearchClient,
    selected: &[RetrievalHit],
    max_new: u32,
    budget_chars: usize,
) -> Vec<RetrievalHit> {
    use std::collections::HashMap;

    let mut max_idx_per_source: HashMap<String, (u32, u32)> = HashMap::new();
    for hit in selected {
        let entry = max_idx_per_source
            .entry(hit.source_name().to_string())
            .or_insert((hit.chunk_index(), hit.properties.total_chunks));
        entry.0 = entry.0.max(hit.chunk_index());
        entry.1 = entry.1.max(hit.properties.total_chunks);
    }

    let mut requests = Vec::new();
    for (source, (max_idx, total)) in &max_idx_per_source {
        for offset in 1..=max_new {
            let idx = max_idx + offset;
            if idx < *total {
                requests.push((source.clone(), idx));
            }
        }
    }

    let already_selected: std::collections::HashSet<(String, u32)> = selected
        .iter()
        .map(|h| (h.source_name().to_string(), h.chunk_index()))
        .collect();

    let fetched = client
        .get_chunks_by_source_and_index(&requests)
        .await
        .unwrap_or_default();

    let mut budget_used: usize = selected.iter().map(|h| h.properties.text.len()).sum();
    let mut expansion = Vec::new();
    for mut hit in fetched {
        if already_selected.contains(&(hit.source_name().to_string(), hit.chunk_index())) {
            continue;
        }
        if budget_used >= budget_chars {
            break;
        }
        hit.is_window_expansion = true;
        hit.final_score = hit.score.max(0.05);
        budget_used += hit.properties.text.len();
        expansion.push(hit);
    }
    expansion
}

/// Normalize selected scores to [0,1]; hits above `score_threshold` seed a
/// walk that fetches prev/next neighbors for up to `max_steps` iterations.
/// Only steps to a neighbor whose index differs by exactly 1 from the
/// current one — guards against corrupt chunk-index data.
pub async fn expand_similarity(
    client: &HybridSearchClient,
    selected: &[RetrievalHit],
    max_steps: u32,
    score_threshold: f32,
    budget_chars: usize,
) -> Vec<RetrievalHit> {
    let max_score = selected.iter().map(|h| h.score).fold(f32::MIN, f32::max).max(1e-6);
    let seeds: Vec<&RetrievalHit> = selected
        .iter()
        .filter(|h| h.score / max_score >= score_threshold)
        .collect();

    let already_selected: std::collections::HashSet<(String, u32)> = selected
        .iter()
        .map(|h| (h.source_name().to_string(), h.chunk_index()))
        .collect();
    let mut seen = already_selected.clone();

    let mut budget_used: usize = selected.iter().map(|h| h.properties.text.len()).sum();
    let mut expansion = Vec::new();

    for seed in seeds {
        let mut current_index = seed.chunk_index();
        for _ in 0..max_steps {
            if budget_used >= budget_chars {
                return expansion;
            }
            let neighbors = client
                .get_chunks_by_ids(seed.source_name(), current_index, 1)
                .await
                .unwrap_or_default();

            let Some(neighbor) = neighbors
                .into_iter()
                .find(|n| (n.chunk_index() as i64 - current_index as i64).abs() == 1)
            else {
                break;
            };

            let key = (neighbor.source_name().to_string(), neighbor.chunk_index());
            if seen.contains(&key) {
                break;
            }
            seen.insert(key);
            current_index = neighbor.chunk_index();

            let mut neighbor = neighbor;
            neighbor.is_window_expansion = true;
            neighbor.final_score = neighbor.score.max(0.05);
            budget_used += neighbor.properties.text.len();
            expansion.push(neighbor);
        }
    }

    expansion
}

/// Merge ±radius-index neighbors that are already present in the candidate
/// pool (no extra DB round trip) when list structure was detected upstream.
pub fn expand_local_neighbors(
    selected: &[RetrievalHit],
    candidate_pool: &[RetrievalHit],
    radius: u32,
) -> Vec<RetrievalHit> {
    let selected_keys: std::collections::HashSet<(String, u32)> = selected
        .iter()
        .map(|h| (h.source_name().to_string(), h.chunk_index()))
        .collect();

    let mut extra = Vec::new();
    for hit in candidate_pool {
        if selected_keys.contains(&(hit.source_name().to_string(), hit.chunk_index())) {
            continue;
        }
        let is_neighbor = selected.iter().any(|s| {
            s.source_name() == hit.source_name()
                && (s.chunk_index() as i64 - hit.chunk_index() as i64).unsigned_abs() <= radius as u64
        });
        if is_neighbor {
            let mut hit = hit.clone();
            hit.is_window_expansion = true;
            hit.final_score = hit.score.max(0.05);
            extra.push(hit);
        }
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_prefers_ordered_when_chunk_index_and_list_mode() {
        assert_eq!(decide_strategy(true, false, true), ExpansionStrategy::OrderedNeighbors);
    }

    #[test]
    fn strategy_falls_back_to_similarity_when_no_chunk_index() {
        assert_eq!(decide_strategy(false, true, false), ExpansionStrategy::SimilarityWalk);
    }

    #[test]
    fn strategy_is_none_when_entailment_found_and_no_list() {
        assert_eq!(decide_strategy(false, false, true), ExpansionStrategy::None);
    }
}
