//! The Retrieval Pipeline (§4.5): candidate cut, MMR diversity, and
//! source-aggregation boost. Expansion is deliberately not done here — it
//! runs after reranking, driven by the rerank outcome (see `expand`).

use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::normalize::jaccard_similarity;
use crate::types::RetrievalHit;

const JACCARD_MIN_WORD_LEN: usize = 3;

/// Keep the top-N by score, plus any hit within `delta_to_top1` of the best
/// score. Relative rather than absolute, because hybrid scores from
/// different fusion strategies are not comparable across queries.
pub fn candidate_cut(mut hits: Vec<RetrievalHit>, top_n: usize, delta_to_top1: f32) -> Vec<RetrievalHit> {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let Some(top_score) = hits.first().map(|h| h.score) else {
        return hits;
    };
    let threshold = top_score - delta_to_top1;

    let mut kept = Vec::with_capacity(hits.len());
    for (i, hit) in hits.into_iter().enumerate() {
        if i < top_n || hit.score >= threshold {
            kept.push(hit);
        }
    }
    kept
}

/// Maximal Marginal Relevance: greedily picks the hit maximizing
/// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`, where
/// similarity is Jaccard over word-sets (word length >= 3). Output order is
/// selection order, not score order.
pub fn mmr_select(hits: Vec<RetrievalHit>, lambda: f32, target: usize) -> Vec<RetrievalHit> {
    if hits.is_empty() {
        return hits;
    }
    let max_score = hits
        .iter()
        .map(|h| h.score)
        .fold(f32::MIN, f32::max)
        .max(1e-6);

    let mut remaining: Vec<usize> = (0..hits.len()).collect();
    let mut selected: Vec<usize> = Vec::new();

    while !remaining.is_empty() && selected.len() < target {
        let mut best_idx_pos = 0;
        let mut best_mmr = f32::MIN;

        for (pos, &idx) in remaining.iter().enumerate() {
            let relevance = hits[idx].score / max_score;
            let max_sim = selected
                .iter()
                .map(|&s| {
                    jaccard_similarity(
                        &hits[idx].properties.text,
                        &hits[s].properties.text,
                        JACCARD_MIN_WORD_LEN,
                    )
                })
                .fold(0.0f32, f32::max);
            let mmr = lambda * relevance - (1.0 - lambda) * max_sim;
            if mmr > best_mmr {
                best_mmr = mmr;
                best_idx_pos = pos;
            }
        }

        selected.push(remaining.remove(best_idx_pos));
    }

    selected.into_iter().map(|idx| hits[idx].clone()).collect()
}

/// Group by `sourceName`, boost each hit's score by how often its source
/// recurs in the result set, then re-sort by the boosted score.
pub fn source_boost(mut hits: Vec<RetrievalHit>, max_boost: f32, boost_per_match: f32) -> Vec<RetrievalHit> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for hit in &hits {
        *counts.entry(hit.source_name().to_string()).or_insert(0) += 1;
    }

    for hit in &mut hits {
        let count = counts.get(hit.source_name()).copied().unwrap_or(1);
        let boost = (count as f32 * boost_per_match).min(max_boost);
        hit.source_boost = boost;
        hit.final_score = hit.score * (1.0 + boost);
    }

    hits.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits
}

/// Runs the full pipeline: candidate cut, MMR, source boost.
pub fn retrieve(raw_hits: Vec<RetrievalHit>, config: &RetrievalConfig, target_chunks: usize) -> Vec<RetrievalHit> {
    let top_n = target_chunks * config.over_fetch_multiplier;
    let cut = candidate_cut(raw_hits, top_n, config.delta_to_top1);
    let diversified = mmr_select(cut, config.mmr_lambda, config.mmr_target);
    source_boost(diversified, config.max_source_boost, config.boost_per_match)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;

    fn hit(text: &str, source: &str, score: f32) -> RetrievalHit {
        let chunk = Chunk {
            text: text.to_string(),
            source_name: source.to_string(),
            chunk_index: 0,
            total_chunks: 1,
            prev_chunk_index: None,
            next_chunk_index: None,
            page_number: Some(1),
            source_namespace: String::new(),
            upload_date: String::new(),
            language: "es".to_string(),
            content_without_overlap: text.to_string(),
            is_qa_pair: false,
            question_text: None,
            start_position: 0,
            end_position: text.len() as u32,
        };
        RetrievalHit::new(format!("{source}-{score}"), chunk, score)
    }

    #[test]
    fn candidate_cut_keeps_top_n_and_close_scores() {
        let hits = vec![hit("a", "s1", 0.9), hit("b", "s1", 0.85), hit("c", "s1", 0.1)];
        let cut = candidate_cut(hits, 1, 0.1);
        assert_eq!(cut.len(), 2);
    }

    #[test]
    fn mmr_prefers_diverse_text_over_near_duplicate() {
        let hits = vec![
            hit("los requisitos son documentos oficiales", "s1", 0.9),
            hit("los requisitos son documentos oficiales vigentes", "s1", 0.89),
            hit("el horario de atencion es de ocho a dos", "s1", 0.7),
        ];
        let selected = mmr_select(hits, 0.5, 2);
        assert_eq!(selected.len(), 2);
        assert!(selected[1].properties.text.contains("horario"));
    }

    #[test]
    fn source_boost_rewards_recurring_source() {
        let hits = vec![
            hit("a", "s1", 0.5),
            hit("b", "s1", 0.5),
            hit("c", "s2", 0.5),
        ];
        let boosted = source_boost(hits, 0.3, 0.05);
        let s1: Vec<_> = boosted.iter().filter(|h| h.source_name() == "s1").collect();
        let s2: Vec<_> = boosted.iter().filter(|h| h.source_name() == "s2").collect();
        assert!(s1[0].final_score > s2[0].final_score);
    }
}
