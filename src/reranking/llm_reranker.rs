//! The NLI reranker/filter (§4.6): for each candidate chunk, have the LLM
//! judge relevance and demand a literal evidence quote, then run the
//! deterministic selection algorithm over its (possibly untrustworthy)
//! judgments.
//!
//! Batches of <= `batch_size` chunks are sent in parallel, capped at
//! `max_concurrent_batches` concurrent requests — the same bounded-fan-out
//! shape the teacher used for its listwise rerank call, just sized per
//! batch instead of per single candidate.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::RerankConfig;
use crate::listdetect::detect_list;
use crate::llm::LlmClient;
use crate::normalize::{normalize, NormalizeLevel};
use crate::types::{ClassifiedQuery, RetrievalHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RerankLabel {
    Contradiction,
    Neutral,
    Entailment,
}

#[derive(Debug, Clone)]
pub struct RerankDecision {
    pub id: String,
    pub label: RerankLabel,
    pub relevance: f32,
    pub evidence: String,
    pub downgrade_reason: Option<String>,
}

pub struct RerankOutcome {
    pub selected: Vec<RetrievalHit>,
    pub used_fallback: bool,
    pub had_entailment: bool,
}

#[derive(Deserialize)]
struct RawDecision {
    id: String,
    label: String,
    relevance: f32,
    #[serde(default)]
    evidence: String,
}

static DIRECT_ANSWER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"los? \w+ son:?",
        r"para ello se necesita",
        r"documentos? necesarios?",
        r"se requiere",
        r"debera[n]? presentar",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("direct answer pattern is valid"))
    .collect()
});

const EXCERPT_BEFORE_FRACTION: f32 = 0.2;

pub async fn rerank(
    llm: &LlmClient,
    query: &ClassifiedQuery,
    hits: Vec<RetrievalHit>,
    config: &RerankConfig,
    target_chunks: usize,
) -> RerankOutcome {
    if hits.is_empty() {
        return RerankOutcome {
            selected: Vec::new(),
            used_fallback: false,
            had_entailment: false,
        };
    }

    let raw_decisions = collect_raw_decisions(llm, query, &hits, config).await;

    let known_ids: HashSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    let valid_count = raw_decisions
        .iter()
        .filter(|d| known_ids.contains(d.id.as_str()))
        .count();
    let coverage = valid_count as f32 / hits.len().max(1) as f32;

    if coverage < config.min_coverage_for_rerank {
        tracing::warn!(coverage, "rerank coverage below threshold, bypassing reranker");
        let mut fallback = hits;
        fallback.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        fallback.truncate(target_chunks);
        return RerankOutcome {
            selected: fallback,
            used_fallback: true,
            had_entailment: false,
        };
    }

    let decisions = validate_and_dedup(raw_decisions, &hits, query, config);
    let had_entailment = decisions.iter().any(|d| d.label == RerankLabel::Entailment);
    let selected = select(decisions, hits, config, target_chunks);

    RerankOutcome {
        selected,
        used_fallback: false,
        had_entailment,
    }
}

async fn collect_raw_decisions(
    llm: &LlmClient,
    query: &ClassifiedQuery,
    hits: &[RetrievalHit],
    config: &RerankConfig,
) -> Vec<RawDecision> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches));
    let batches: Vec<&[RetrievalHit]> = hits.chunks(config.batch_size).collect();

    let futures = batches.into_iter().map(|batch| {
        let semaphore = Arc::clone(&semaphore);
        let query = query.clone();
        let batch = batch.to_vec();
        let budget = config.per_chunk_char_budget;
        async move {
            let _permit = semaphore.acquire().await.ok()?;
            judge_batch(llm, &query, &batch, budget).await
        }
    });

    futures::future::join_all(futures)
        .await
        .into_iter()
        .flatten()
        .flatten()
        .collect()
}

async fn judge_batch(
    llm: &LlmClient,
    query: &ClassifiedQuery,
    batch: &[RetrievalHit],
    budget: usize,
) -> Option<Vec<RawDecision>> {
    let numbered: String = batch
        .iter()
        .map(|hit| {
            let excerpt = excerpt_chunk(&hit.properties.text, &query.embed_query, budget);
            format!("id={}\n{}", hit.id, excerpt)
        })
        .collect::<Vec<_>>()
        .join("\n---\n");

    let system = "Eres un juez de relevancia. Para cada fragmento numerado, decide si \
                  contiene una respuesta literal a la pregunta (ENTAILMENT), es \
                  tangencialmente relacionado (NEUTRAL), o la contradice (CONTRADICTION). \
                  Devuelve SOLO un arreglo JSON de objetos {id, label, relevance, evidence}. \
                  `evidence` debe ser una cita textual contigua de 6 a 25 palabras del \
                  fragmento, sin puntos suspensivos.";
    let user = format!("Pregunta: \"{}\"\n\nFragmentos:\n{}", query.raw_query, numbered);

    let raw_output = match llm.generate(system, &user, 0.0, 1024).await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(error = %e, "rerank batch call failed");
            return None;
        }
    };

    parse_decisions(&raw_output)
}

fn parse_decisions(output: &str) -> Option<Vec<RawDecision>> {
    let trimmed = output
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(decisions) = serde_json::from_str::<Vec<RawDecision>>(trimmed) {
        return Some(decisions);
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<RawDecision>>(&trimmed[start..=end]).ok()
}

/// Truncate a chunk to `budget` chars, centering the window on the first
/// query-token match rather than the start of the text, so a naive head
/// truncation never hides the relevant sentence.
fn excerpt_chunk(text: &str, query: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }

    let normalized_text = normalize(text, NormalizeLevel::Strict);
    let first_token = normalize(query, NormalizeLevel::Strict)
        .split_whitespace()
        .find(|w| w.len() >= 3)
        .unwrap_or("")
        .to_string();

    let normalized_match_offset = if first_token.is_empty() {
        0
    } else {
        normalized_text.find(&first_token).unwrap_or(0)
    };

    let chars: Vec<char> = text.chars().collect();
    let proportional_offset = if normalized_text.is_empty() {
        0
    } else {
        (normalized_match_offset as f32 / normalized_text.len() as f32 * chars.len() as f32) as usize
    };

    let before = (budget as f32 * EXCERPT_BEFORE_FRACTION) as usize;
    let start = proportional_offset.saturating_sub(before);
    let end = (start + budget).min(chars.len());
    let start = end.saturating_sub(budget).max(0).min(start);

    chars[start..end].iter().collect()
}

fn validate_and_dedup(
    raw: Vec<RawDecision>,
    hits: &[RetrievalHit],
    query: &ClassifiedQuery,
    config: &RerankConfig,
) -> Vec<RerankDecision> {
    let chunk_by_id: HashMap<&str, &RetrievalHit> = hits.iter().map(|h| (h.id.as_str(), h)).collect();
    let normalized_query = normalize(&query.raw_query, NormalizeLevel::Strict);

    let mut best: HashMap<String, RerankDecision> = HashMap::new();

    for raw_decision in raw {
        let Some(hit) = chunk_by_id.get(raw_decision.id.as_str()) else {
            continue;
        };

        let raw_label = match raw_decision.label.to_uppercase().as_str() {
            "ENTAILMENT" => RerankLabel::Entailment,
            "CONTRADICTION" => RerankLabel::Contradiction,
            _ => RerankLabel::Neutral,
        };

        let (label, reason) = if raw_label == RerankLabel::Entailment {
            downgrade_if_invalid(&raw_decision, hit, &normalized_query, config)
        } else {
            (raw_label, None)
        };

        let decision = RerankDecision {
            id: raw_decision.id.clone(),
            label,
            relevance: raw_decision.relevance,
            evidence: raw_decision.evidence,
            downgrade_reason: reason,
        };

        best.entry(raw_decision.id)
            .and_modify(|existing| {
                if rank_key(&decision) > rank_key(existing) {
                    *existing = decision.clone();
                }
            })
            .or_insert(decision);
    }

    best.into_values().collect()
}

fn rank_key(decision: &RerankDecision) -> (RerankLabel, ordered_float::OrderedF32) {
    (decision.label, ordered_float::OrderedF32(decision.relevance))
}

mod ordered_float {
    #[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
    pub struct OrderedF32(pub f32);
    impl Eq for OrderedF32 {}
    impl Ord for OrderedF32 {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}

fn downgrade_if_invalid(
    raw: &RawDecision,
    hit: &RetrievalHit,
    normalized_query: &str,
    config: &RerankConfig,
) -> (RerankLabel, Option<String>) {
    let normalized_chunk = normalize(&hit.properties.text, NormalizeLevel::Strict);
    let normalized_evidence = normalize(&raw.evidence, NormalizeLevel::Strict);

    if !normalized_chunk.contains(&normalized_evidence) || normalized_evidence.is_empty() {
        return (RerankLabel::Neutral, Some("evidence not a substring of chunk".into()));
    }
    if raw.evidence.contains('?') || normalized_evidence.contains(normalized_query) {
        return (RerankLabel::Neutral, Some("evidence restates the question".into()));
    }
    if raw.relevance < config.min_entailment_relevance {
        return (
            RerankLabel::Neutral,
            Some(format!("relevance {} below floor", raw.relevance)),
        );
    }
    (RerankLabel::Entailment, None)
}

fn has_direct_answer_shape(text: &str) -> bool {
    let normalized = normalize(text, NormalizeLevel::Strict);
    DIRECT_ANSWER_PATTERNS.iter().any(|re| re.is_match(&normalized))
}

fn select(
    decisions: Vec<RerankDecision>,
    hits: Vec<RetrievalHit>,
    config: &RerankConfig,
    target_chunks: usize,
) -> Vec<RetrievalHit> {
    let decision_by_id: HashMap<String, RerankDecision> =
        decisions.into_iter().map(|d| (d.id.clone(), d)).collect();
    let hit_by_id: HashMap<String, RetrievalHit> = hits.iter().map(|h| (h.id.clone(), h.clone())).collect();

    let mut entailments: Vec<&RetrievalHit> = hits
        .iter()
        .filter(|h| matches!(decision_by_id.get(&h.id).map(|d| d.label), Some(RerankLabel::Entailment)))
        .collect();

    let mut selected_ids: Vec<String> = Vec::new();

    if !entailments.is_empty() {
        entailments.sort_by(|a, b| {
            let da = has_direct_answer_shape(&a.properties.text);
            let db = has_direct_answer_shape(&b.properties.text);
            db.cmp(&da)
                .then_with(|| {
                    let ra = decision_by_id.get(&a.id).map(|d| d.relevance).unwrap_or(0.0);
                    let rb = decision_by_id.get(&b.id).map(|d| d.relevance).unwrap_or(0.0);
                    rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
        });

        for hit in entailments.iter().take(target_chunks) {
            selected_ids.push(hit.id.clone());
        }

        // List-continuation admission: same source, within adjacency window,
        // list structure visible in the candidate's own text.
        let entailment_anchors: Vec<(String, u32)> = entailments
            .iter()
            .take(target_chunks)
            .map(|h| (h.source_name().to_string(), h.chunk_index()))
            .collect();

        for hit in &hits {
            if selected_ids.contains(&hit.id) {
                continue;
            }
            if !matches!(decision_by_id.get(&hit.id).map(|d| d.label), Some(RerankLabel::Neutral)) {
                continue;
            }
            let is_continuation = entailment_anchors.iter().any(|(source, idx)| {
                source == hit.source_name()
                    && (hit.chunk_index() as i64 - *idx as i64).unsigned_abs()
                        <= config.list_continuation_adjacency as u64
            });
            if is_continuation && detect_list(&hit.properties.text).is_list {
                selected_ids.push(hit.id.clone());
            }
        }
    }

    // Safety guardrail: any NEUTRAL whose raw retrieval score clears the
    // trust threshold gets admitted regardless of the LLM's judgment.
    for hit in &hits {
        if selected_ids.contains(&hit.id) {
            continue;
        }
        if hit.score >= config.retrieval_trust_threshold
            && !matches!(decision_by_id.get(&hit.id).map(|d| d.label), Some(RerankLabel::Contradiction))
        {
            selected_ids.push(hit.id.clone());
        }
    }

    if entailments.is_empty() {
        let mut by_score = hits.clone();
        by_score.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        for hit in by_score.into_iter().take(target_chunks) {
            if !selected_ids.contains(&hit.id) {
                selected_ids.push(hit.id);
            }
        }
    }

    // Safety net: top N by retrieval score are always present.
    let mut by_score = hits.clone();
    by_score.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for hit in by_score.into_iter().take(config.top_n_safety_net) {
        if !selected_ids.contains(&hit.id) {
            selected_ids.push(hit.id);
        }
    }

    selected_ids
        .into_iter()
        .filter_map(|id| hit_by_id.get(&id).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;

    fn make_hit(id: &str, text: &str, source: &str, chunk_index: u32, score: f32) -> RetrievalHit {
        let chunk = Chunk {
            text: text.to_string(),
            source_name: source.to_string(),
            chunk_index,
            total_chunks: 10,
            prev_chunk_index: chunk_index.checked_sub(1),
            next_chunk_index: Some(chunk_index + 1),
            page_number: Some(chunk_index + 1),
            source_namespace: String::new(),
            upload_date: String::new(),
            language: "es".to_string(),
            content_without_overlap: text.to_string(),
            is_qa_pair: false,
            question_text: None,
            start_position: 0,
            end_position: text.len() as u32,
        };
        RetrievalHit::new(id, chunk, score)
    }

    #[test]
    fn excerpt_centers_on_query_match_not_head() {
        let filler = "x ".repeat(500);
        let text = format!("{filler}la respuesta clave aparece aqui {filler}");
        let excerpted = excerpt_chunk(&text, "respuesta clave", 200);
        assert!(excerpted.contains("respuesta clave"));
    }

    #[test]
    fn downgrade_rejects_evidence_not_in_chunk() {
        let hit = make_hit("1", "el horario es de ocho a dos", "doc.pdf", 0, 0.5);
        let raw = RawDecision {
            id: "1".to_string(),
            label: "ENTAILMENT".to_string(),
            relevance: 9.0,
            evidence: "texto que no existe en el fragmento original".to_string(),
        };
        let config = RerankConfig::default();
        let (label, reason) = downgrade_if_invalid(&raw, &hit, "horario", &config);
        assert_eq!(label, RerankLabel::Neutral);
        assert!(reason.is_some());
    }

    #[test]
    fn downgrade_rejects_low_relevance() {
        let hit = make_hit("1", "el horario es de ocho a dos de la tarde", "doc.pdf", 0, 0.5);
        let raw = RawDecision {
            id: "1".to_string(),
            label: "ENTAILMENT".to_string(),
            relevance: 2.0,
            evidence: "de ocho a dos de la tarde".to_string(),
        };
        let config = RerankConfig::default();
        let (label, _) = downgrade_if_invalid(&raw, &hit, "horario", &config);
        assert_eq!(label, RerankLabel::Neutral);
    }

    #[test]
    fn select_always_includes_safety_net_even_with_no_entailments() {
        let hits = vec![
            make_hit("1", "texto a", "doc.pdf", 0, 0.9),
            make_hit("2", "texto b", "doc.pdf", 1, 0.2),
        ];
        let decisions = vec![
            RerankDecision {
                id: "1".into(),
                label: RerankLabel::Contradiction,
                relevance: 0.0,
                evidence: String::new(),
                downgrade_reason: None,
            },
            RerankDecision {
                id: "2".into(),
                label: RerankLabel::Contradiction,
                relevance: 0.0,
                evidence: String::new(),
                downgrade_reason: None,
            },
        ];
        let config = RerankConfig {
            top_n_safety_net: 1,
            ..RerankConfig::default()
        };
        let selected = select(decisions, hits, &config, 5);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "1");
    }

    #[test]
    fn select_admits_list_continuation_neutral() {
        let hits = vec![
            make_hit("1", "los estados son: Jalisco", "doc.pdf", 0, 0.8),
            make_hit("2", "1. Jalisco\n2. Sonora\n3. Colima", "doc.pdf", 1, 0.3),
        ];
        let decisions = vec![
            RerankDecision {
                id: "1".into(),
                label: RerankLabel::Entailment,
                relevance: 9.0,
                evidence: "los estados son Jalisco".into(),
                downgrade_reason: None,
            },
            RerankDecision {
                id: "2".into(),
                label: RerankLabel::Neutral,
                relevance: 3.0,
                evidence: String::new(),
                downgrade_reason: None,
            },
        ];
        let config = RerankConfig::default();
        let selected = select(decisions, hits, &config, 5);
        assert!(selected.iter().any(|h| h.id == "2"));
    }
}
