//! Query pipeline orchestration (§4 end-to-end data flow): classify ->
//! hybrid search -> retrieve -> rerank -> expand -> assemble -> prompt ->
//! generate -> validate citations -> (repair once) -> respond.

use std::sync::Arc;

use crate::citation::{self, CitationOutcome};
use crate::classify;
use crate::config::RagConfig;
use crate::embedder::Embedder;
use crate::expand::{self, ExpansionStrategy};
use crate::listdetect::detect_list;
use crate::llm::LlmClient;
use crate::normalize::repair_mojibake;
use crate::prompt;
use crate::reranking::rerank;
use crate::retrieval;
use crate::search::HybridSearchClient;
use crate::types::{ClassifiedQuery, ContextBundle, RefusalReason};

pub struct QueryEngine {
    config: RagConfig,
    search: Arc<HybridSearchClient>,
    embedder: Arc<Embedder>,
    llm: Arc<LlmClient>,
}

pub struct QueryAnswer {
    pub answer: String,
    pub classified: ClassifiedQuery,
    pub citations: CitationOutcome,
    pub sources: Vec<String>,
    pub chunks_used: usize,
    pub chunks_total: usize,
}

pub enum QueryResult {
    Answered(QueryAnswer),
    Refused(RefusalReason),
}

impl QueryEngine {
    pub fn new(config: RagConfig, search: Arc<HybridSearchClient>, embedder: Arc<Embedder>, llm: Arc<LlmClient>) -> Self {
        Self { config, search, embedder, llm }
    }

    pub fn model_id(&self) -> &str {
        &self.config.llm.model
    }

    pub async fn answer(&self, raw_query: &str) -> anyhow::Result<QueryResult> {
        let repaired_query = repair_mojibake(raw_query, self.config.mojibake_repair);
        let classified = classify::classify(
            &repaired_query,
            self.config.retrieval.default_target_chunks,
            self.config.retrieval.total_query_target_chunks,
        );

        let embedding = self.embedder.embed_qna(&classified.embed_query).await?;
        let over_fetch = classified.target_chunks * self.config.retrieval.over_fetch_multiplier;
        let raw_hits = self
            .search
            .search_hybrid_both(&classified.bm25_query, &embedding, over_fetch, classified.alpha, classified.fusion)
            .await?;

        if raw_hits.is_empty() {
            return Ok(QueryResult::Refused(RefusalReason::NoChunks));
        }

        let retrieved = retrieval::retrieve(raw_hits.clone(), &self.config.retrieval, classified.target_chunks);

        let outcome = rerank(&self.llm, &classified, retrieved.clone(), &self.config.rerank, classified.target_chunks).await;
        if outcome.selected.is_empty() {
            return Ok(QueryResult::Refused(RefusalReason::LlmFilterZeroRelevant));
        }

        let top_score = outcome.selected.iter().map(|h| h.score).fold(f32::MIN, f32::max);
        let has_list_evidence = outcome
            .selected
            .iter()
            .any(|h| detect_list(&h.properties.text).is_list);
        let zero_entailment = !outcome.had_entailment;
        if zero_entailment && !outcome.used_fallback && !has_list_evidence && top_score < self.config.rerank.refusal_score_floor {
            return Ok(QueryResult::Refused(RefusalReason::NoEntailmentsAfterRerank));
        }

        let list_mode = outcome.selected.iter().any(|h| detect_list(&h.properties.text).is_list);
        let has_chunk_index = outcome.selected.iter().all(|h| h.properties.total_chunks > 0);
        let strategy = expand::decide_strategy(list_mode, zero_entailment, has_chunk_index);

        let mut expanded = outcome.selected.clone();
        match strategy {
            ExpansionStrategy::OrderedNeighbors => {
                let mut new_hits = expand::expand_ordered(
                    &self.search,
                    &outcome.selected,
                    self.config.assembler.ordered_expansion_max_new,
                    self.config.assembler.max_context_chars,
                )
                .await;
                if new_hits.is_empty() {
                    new_hits = expand::expand_similarity(
                        &self.search,
                        &outcome.selected,
                        self.config.assembler.similarity_expansion_max_steps,
                        self.config.assembler.similarity_expansion_score_threshold,
                        self.config.assembler.max_context_chars,
                    )
                    .await;
                }
                expanded.extend(new_hits);
            }
            ExpansionStrategy::SimilarityWalk => {
                let new_hits = expand::expand_similarity(
                    &self.search,
                    &outcome.selected,
                    self.config.assembler.similarity_expansion_max_steps,
                    self.config.assembler.similarity_expansion_score_threshold,
                    self.config.assembler.max_context_chars,
                )
                .await;
                expanded.extend(new_hits);
            }
            ExpansionStrategy::LocalNeighborsOnly | ExpansionStrategy::None => {}
        }
        if list_mode {
            let local = expand::expand_local_neighbors(&outcome.selected, &retrieved, self.config.assembler.local_neighbor_radius);
            expanded.extend(local);
        }

        let bundle: ContextBundle = crate::assemble::assemble(&expanded, &self.config.assembler);
        if bundle.used_chunks == 0 {
            return Ok(QueryResult::Refused(RefusalReason::NoChunks));
        }

        let chunks_total = retrieved.len();
        let citations = self.generate_and_repair(&repaired_query, &bundle).await?;

        Ok(QueryResult::Answered(QueryAnswer {
            answer: citations.answer.clone(),
            sources: bundle.sources.clone(),
            chunks_used: bundle.used_chunks,
            chunks_total,
            citations,
            classified,
        }))
    }

    async fn generate_and_repair(&self, raw_query: &str, bundle: &ContextBundle) -> anyhow::Result<CitationOutcome> {
        let system = prompt::system_message();
        let user = prompt::user_message(raw_query, bundle);
        let first_pass = self.llm.generate(&system, &user, 0.2, 1024).await?;
        let outcome = citation::validate_answer(&first_pass, bundle);

        if !citation::needs_repair(&outcome) {
            return Ok(outcome);
        }

        tracing::info!("answer had zero valid citations, attempting one repair round-trip");
        let repair_user = format!(
            "{user}\n\n---\n\nTu respuesta anterior no incluyo citas validas. Reescribe la \
             respuesta citando unicamente texto literal del contexto anterior, con el formato \
             \"Fuente:\" exigido."
        );
        let second_pass = self.llm.generate(&system, &repair_user, 0.2, 1024).await?;
        Ok(citation::validate_answer(&second_pass, bundle))
    }
}

