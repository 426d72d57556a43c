//! The Hybrid Search Client (§4.4): the one seam the retrieval pipeline
//! talks to. Wraps two collections — Regular and QnA — each backed by a
//! `LanceStore` (vectors) and a `TextSearch` (BM25), and fuses the two
//! result lists itself per `ClassifiedQuery.fusion`.

use anyhow::Result;
use std::sync::Arc;

use crate::config::RagConfig;
use crate::storage::LanceStore;
use crate::types::{Chunk, Collection, FusionStrategy, RetrievalHit};

use super::hybrid::{ranked_fusion, relative_score_fusion};
use super::text_search::TextSearch;

pub struct HybridSearchClient {
    regular_store: Arc<LanceStore>,
    qna_store: Arc<LanceStore>,
    regular_text: Arc<TextSearch>,
    qna_text: Arc<TextSearch>,
    regular_dimensions: usize,
}

impl HybridSearchClient {
    pub async fn new(config: &RagConfig, data_dir: &str) -> Result<Self> {
        let regular_store = Arc::new(
            LanceStore::new(
                &format!("{data_dir}/lancedb"),
                &config.collection_name,
                config.embedding.dimensions,
            )
            .await?,
        );
        let qna_store = Arc::new(
            LanceStore::new(
                &format!("{data_dir}/lancedb"),
                &config.qna_collection_name,
                config.embedding.qna_dimensions,
            )
            .await?,
        );
        let regular_text = Arc::new(TextSearch::new(&format!(
            "{data_dir}/tantivy_{}",
            config.collection_name
        ))?);
        let qna_text = Arc::new(TextSearch::new(&format!(
            "{data_dir}/tantivy_{}",
            config.qna_collection_name
        ))?);

        Ok(Self {
            regular_store,
            qna_store,
            regular_text,
            qna_text,
            regular_dimensions: config.embedding.dimensions,
        })
    }

    /// Idempotent schema bootstrap for both collections.
    pub async fn ensure_both_collections_exist(&self) -> Result<()> {
        self.regular_store.ensure_table().await?;
        self.qna_store.ensure_table().await
    }

    /// Issue one hybrid query per collection and merge by the configured
    /// fusion strategy. `embedding` is the full-dimension (QnA) embedding;
    /// the Regular collection query uses it truncated to its own dimension.
    pub async fn search_hybrid_both(
        &self,
        bm25_query: &str,
        embedding: &[f32],
        limit: usize,
        alpha: f32,
        fusion: FusionStrategy,
    ) -> Result<Vec<RetrievalHit>> {
        let regular_embedding: Vec<f32> = embedding
            .iter()
            .copied()
            .take(self.regular_dimensions)
            .collect();

        let joined = tokio::try_join!(
            self.search_one_collection(
                &self.regular_store,
                &self.regular_text,
                bm25_query,
                &regular_embedding,
                limit,
                alpha,
                fusion,
            ),
            self.search_one_collection(
                &self.qna_store,
                &self.qna_text,
                bm25_query,
                embedding,
                limit,
                alpha,
                fusion,
            ),
        );

        let (regular_hits, qna_hits) = match joined {
            Ok(pair) => pair,
            Err(err) => {
                // §7 "Vector-DB transient": degrade to pure-vector search
                // across both collections rather than failing the query.
                tracing::warn!(error = %err, "hybrid search failed, falling back to vector-only search");
                return self.search_by_vector(embedding, limit).await;
            }
        };

        let mut merged = regular_hits;
        merged.extend(qna_hits);
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(limit);
        Ok(merged)
    }

    async fn search_one_collection(
        &self,
        store: &LanceStore,
        text: &TextSearch,
        bm25_query: &str,
        embedding: &[f32],
        limit: usize,
        alpha: f32,
        fusion: FusionStrategy,
    ) -> Result<Vec<RetrievalHit>> {
        let vector_hits = store.vector_search(embedding, limit).await?;
        let vector_scores: Vec<(String, f32)> =
            vector_hits.iter().map(|h| (h.id.clone(), h.score)).collect();

        let fts_scores = text.search(bm25_query, limit).unwrap_or_default();

        let fused = match fusion {
            FusionStrategy::RankedFusion => ranked_fusion(vector_scores, fts_scores.clone(), alpha, 60, limit),
            FusionStrategy::RelativeScoreFusion => {
                relative_score_fusion(vector_scores, fts_scores.clone(), alpha, limit)
            }
        };

        let mut by_id: std::collections::HashMap<String, &crate::storage::SearchHit> =
            vector_hits.iter().map(|h| (h.id.clone(), h)).collect();

        // FTS-only hits need their chunk data fetched from the vector store.
        let fts_only_ids: Vec<String> = fused
            .iter()
            .filter(|(id, _, _)| !by_id.contains_key(id))
            .map(|(id, _, _)| id.clone())
            .collect();
        let fetched = if fts_only_ids.is_empty() {
            Vec::new()
        } else {
            store.get_by_ids(&fts_only_ids).await?
        };
        for hit in &fetched {
            by_id.entry(hit.id.clone()).or_insert(hit);
        }

        let mut hits = Vec::with_capacity(fused.len());
        for (id, score, _source) in fused {
            if let Some(hit) = by_id.get(&id) {
                hits.push(RetrievalHit::new(id, hit.chunk.clone(), score));
            }
        }
        Ok(hits)
    }

    /// Pure-vector fallback across both collections (used when the BM25
    /// side of a hybrid query fails — §7 "vector-DB transient").
    pub async fn search_by_vector(&self, embedding: &[f32], limit: usize) -> Result<Vec<RetrievalHit>> {
        let regular_embedding: Vec<f32> = embedding
            .iter()
            .copied()
            .take(self.regular_dimensions)
            .collect();
        let (regular, qna) = tokio::try_join!(
            self.regular_store.vector_search(&regular_embedding, limit),
            self.qna_store.vector_search(embedding, limit),
        )?;
        let mut merged: Vec<RetrievalHit> = regular
            .into_iter()
            .chain(qna)
            .map(|h| RetrievalHit::new(h.id, h.chunk, h.score))
            .collect();
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(limit);
        Ok(merged)
    }

    /// Neighbor fetch for the similarity expander — searches whichever
    /// collection the source actually lives in (both are tried since the
    /// caller doesn't track collection membership per hit).
    pub async fn get_chunks_by_ids(
        &self,
        source_name: &str,
        chunk_index: u32,
        window: u32,
    ) -> Result<Vec<RetrievalHit>> {
        let (regular, qna) = tokio::try_join!(
            self.regular_store.get_neighbors(source_name, chunk_index, window),
            self.qna_store.get_neighbors(source_name, chunk_index, window),
        )?;
        Ok(regular
            .into_iter()
            .chain(qna)
            .map(|h| RetrievalHit::new(h.id, h.chunk, h.score))
            .collect())
    }

    /// Batched exact fetch for ordered expansion.
    pub async fn get_chunks_by_source_and_index(
        &self,
        requests: &[(String, u32)],
    ) -> Result<Vec<RetrievalHit>> {
        let mut hits = Vec::new();
        for (source_name, chunk_index) in requests {
            if let Some(hit) = self
                .regular_store
                .get_by_source_and_index(source_name, *chunk_index)
                .await?
            {
                hits.push(RetrievalHit::new(hit.id, hit.chunk, hit.score));
                continue;
            }
            if let Some(hit) = self
                .qna_store
                .get_by_source_and_index(source_name, *chunk_index)
                .await?
            {
                hits.push(RetrievalHit::new(hit.id, hit.chunk, hit.score));
            }
        }
        Ok(hits)
    }

    pub async fn insert_batch(&self, rows: Vec<(String, Chunk, Vec<f32>)>) -> Result<()> {
        for (id, chunk, text_vec) in &rows {
            self.regular_text
                .index_chunk(id, &chunk.text, "", &chunk.source_name)?;
            let _ = text_vec;
        }
        self.regular_text.commit()?;
        self.regular_store.insert_batch(rows).await
    }

    pub async fn insert_batch_qna(&self, rows: Vec<(String, Chunk, Vec<f32>)>) -> Result<()> {
        for (id, chunk, _) in &rows {
            self.qna_text
                .index_chunk(id, &chunk.text, "", &chunk.source_name)?;
        }
        self.qna_text.commit()?;
        self.qna_store.insert_batch(rows).await
    }

    /// Delete by filter, replace-on-reingest. Used on both collections at
    /// once for the same `sourceName` (§3 invariant: last ingestion wins).
    pub async fn delete_by_filter(&self, field: &str, value: &str) -> Result<usize> {
        self.regular_text.delete_by_source(value).ok();
        self.regular_store.delete_by_filter(field, value).await
    }

    pub async fn delete_by_filter_qna(&self, field: &str, value: &str) -> Result<usize> {
        self.qna_text.delete_by_source(value).ok();
        self.qna_store.delete_by_filter(field, value).await
    }

    pub fn collection_for(&self, chunk: &Chunk) -> Collection {
        Collection::for_chunk(chunk)
    }
}
