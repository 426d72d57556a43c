//! Score fusion for blending one collection's BM25 and vector result lists
//! into a single ranked list (§4.2's `fusion` field, §4.4's
//! `searchHybridBoth`).
//!
//! The vector DB contract in the spec describes a single native "hybrid"
//! call per collection; this crate realizes that call itself by running a
//! `tantivy` query and a `lancedb` ANN query side by side and fusing them
//! here, weighted by the classifier's `alpha`.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub enum HybridSource {
    Vector,
    TextSearch,
    Both,
}

/// Rank-based fusion: each list's contribution is its reciprocal-rank score,
/// blended by `alpha` (vector weight) vs `1 - alpha` (BM25 weight). Used by
/// `QuestionType::Numeric` queries, where raw score magnitude is noisy but
/// rank order is trustworthy.
pub fn ranked_fusion(
    vector_results: Vec<(String, f32)>,
    fts_results: Vec<(String, f32)>,
    alpha: f32,
    rrf_k: usize,
    top_k: usize,
) -> Vec<(String, f32, HybridSource)> {
    let mut scores: HashMap<String, (f32, HybridSource)> = HashMap::new();

    for (rank, (id, _)) in vector_results.iter().enumerate() {
        let rrf = alpha / (rrf_k as f32 + rank as f32 + 1.0);
        scores
            .entry(id.clone())
            .and_modify(|(s, src)| {
                *s += rrf;
                *src = HybridSource::Both;
            })
            .or_insert((rrf, HybridSource::Vector));
    }

    for (rank, (id, _)) in fts_results.iter().enumerate() {
        let rrf = (1.0 - alpha) / (rrf_k as f32 + rank as f32 + 1.0);
        scores
            .entry(id.clone())
            .and_modify(|(s, src)| {
                *s += rrf;
                *src = HybridSource::Both;
            })
            .or_insert((rrf, HybridSource::TextSearch));
    }

    finish(scores, top_k)
}

/// Score-based fusion: each list is independently min-max normalized to
/// `[0,1]`, then blended `alpha * vector + (1 - alpha) * bm25`. Used by the
/// other three question types, where the absolute score gap between
/// candidates carries real signal (e.g. a sharp drop after the best match).
pub fn relative_score_fusion(
    vector_results: Vec<(String, f32)>,
    fts_results: Vec<(String, f32)>,
    alpha: f32,
    top_k: usize,
) -> Vec<(String, f32, HybridSource)> {
    let normalized = |results: &[(String, f32)]| -> Vec<(String, f32)> {
        if results.is_empty() {
            return vec![];
        }
        let max = results.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
        let min = results.iter().map(|(_, s)| *s).fold(f32::MAX, f32::min);
        let range = (max - min).max(1e-6);
        results
            .iter()
            .map(|(id, s)| (id.clone(), (s - min) / range))
            .collect()
    };

    let norm_vec = normalized(&vector_results);
    let norm_fts = normalized(&fts_results);

    let mut scores: HashMap<String, (f32, HybridSource)> = HashMap::new();

    for (id, score) in &norm_vec {
        scores.insert(id.clone(), (alpha * score, HybridSource::Vector));
    }

    for (id, score) in &norm_fts {
        scores
            .entry(id.clone())
            .and_modify(|(s, src)| {
                *s += (1.0 - alpha) * score;
                *src = HybridSource::Both;
            })
            .or_insert(((1.0 - alpha) * score, HybridSource::TextSearch));
    }

    finish(scores, top_k)
}

fn finish(
    scores: HashMap<String, (f32, HybridSource)>,
    top_k: usize,
) -> Vec<(String, f32, HybridSource)> {
    let mut merged: Vec<(String, f32, HybridSource)> = scores
        .into_iter()
        .map(|(id, (score, source))| (id, score, source))
        .collect();
    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranked_fusion_favors_vector_when_alpha_high() {
        let vec_only = vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)];
        let fts_only = vec![("b".to_string(), 10.0), ("a".to_string(), 1.0)];
        let merged = ranked_fusion(vec_only, fts_only, 0.9, 60, 10);
        assert_eq!(merged[0].0, "a");
    }

    #[test]
    fn relative_score_fusion_blends_both_lists() {
        let vector = vec![("a".to_string(), 1.0), ("b".to_string(), 0.0)];
        let fts = vec![("a".to_string(), 0.0), ("b".to_string(), 1.0)];
        let merged = relative_score_fusion(vector, fts, 0.5, 10);
        // Both candidates blend to the same combined score at alpha=0.5.
        assert_eq!(merged.len(), 2);
        assert!((merged[0].1 - merged[1].1).abs() < 1e-6);
    }

    #[test]
    fn documents_in_both_lists_are_marked_both() {
        let vector = vec![("a".to_string(), 1.0)];
        let fts = vec![("a".to_string(), 1.0)];
        let merged = relative_score_fusion(vector, fts, 0.5, 10);
        assert!(matches!(merged[0].2, HybridSource::Both));
    }
}
