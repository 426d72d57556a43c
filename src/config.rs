//! Settings surface, loaded once from the environment at startup.
//!
//! Mirrors the teacher's read-mostly `RAGConfig` singleton shape, but every
//! field traces to a named environment variable (§6) instead of filesystem
//! probing for local model directories — there are no local models anymore,
//! embedding and generation are both external HTTP services.

use std::env;

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub vector_db_host: String,
    pub vector_db_api_key: Option<String>,
    pub collection_name: String,
    pub qna_collection_name: String,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub assembler: AssemblerConfig,
    pub debug: DebugConfig,
    pub bind_addr: String,
    pub mojibake_repair: bool,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub model: String,
    pub dimensions: usize,
    pub qna_dimensions: usize,
    /// Shared token-bucket ceiling (§5 "Shared Resources") gating every
    /// embedding call made through this config, upstream-QPS included.
    pub requests_per_second: u32,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub qna_min_pairs: usize,
    pub qna_min_coverage: f32,
    pub qna_max_answer_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 150,
            qna_min_pairs: 3,
            qna_min_coverage: 0.60,
            qna_max_answer_chars: 3000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub default_target_chunks: usize,
    pub total_query_target_chunks: usize,
    pub over_fetch_multiplier: usize,
    pub delta_to_top1: f32,
    pub mmr_lambda: f32,
    pub mmr_target: usize,
    pub max_source_boost: f32,
    pub boost_per_match: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_target_chunks: 12,
            total_query_target_chunks: 20,
            over_fetch_multiplier: 4,
            delta_to_top1: 0.08,
            mmr_lambda: 0.6,
            mmr_target: 15,
            max_source_boost: 0.3,
            boost_per_match: 0.05,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RerankConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub per_chunk_char_budget: usize,
    pub min_entailment_relevance: f32,
    pub min_coverage_for_rerank: f32,
    pub retrieval_trust_threshold: f32,
    pub top_n_safety_net: usize,
    pub list_continuation_adjacency: u32,
    pub refusal_score_floor: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            batch_size: 6,
            max_concurrent_batches: 3,
            per_chunk_char_budget: 1800,
            min_entailment_relevance: 6.0,
            min_coverage_for_rerank: 0.34,
            retrieval_trust_threshold: 0.72,
            top_n_safety_net: 3,
            list_continuation_adjacency: 2,
            refusal_score_floor: 0.6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub max_context_chars: usize,
    pub max_chunks_total: usize,
    pub max_chunks_per_source: usize,
    pub max_chars_per_chunk: usize,
    pub local_neighbor_radius: u32,
    pub ordered_expansion_max_new: u32,
    pub similarity_expansion_max_steps: u32,
    pub similarity_expansion_score_threshold: f32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 16_000,
            max_chunks_total: 18,
            max_chunks_per_source: 6,
            max_chars_per_chunk: 2_200,
            local_neighbor_radius: 3,
            ordered_expansion_max_new: 4,
            similarity_expansion_max_steps: 3,
            similarity_expansion_score_threshold: 0.55,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DebugConfig {
    pub rag: bool,
    pub rag_full: bool,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    matches!(env::var(key).ok().as_deref(), Some("1") | Some("true"))
}

fn env_usize(key: &str, default: usize) -> Result<usize, String> {
    match env::var(key) {
        Ok(v) => v
            .parse::<usize>()
            .map_err(|_| format!("{key} must be a positive integer, got {v:?}")),
        Err(_) => Ok(default),
    }
}

impl RagConfig {
    /// Load configuration from the process environment. Missing values that
    /// have no sane default (vector DB host, LLM/embedding URLs) are errors,
    /// not silently-defaulted local paths — this is a service, not a
    /// self-contained desktop app.
    pub fn from_env() -> Result<Self, String> {
        let vector_db_host = env::var("VECTOR_DB_HOST")
            .map_err(|_| "VECTOR_DB_HOST must be set".to_string())?;
        let embedding_api_url = env::var("EMBEDDING_API_URL")
            .map_err(|_| "EMBEDDING_API_URL must be set".to_string())?;
        let llm_api_url =
            env::var("LLM_API_URL").map_err(|_| "LLM_API_URL must be set".to_string())?;

        let config = Self {
            vector_db_host,
            vector_db_api_key: env::var("VECTOR_DB_API_KEY").ok(),
            collection_name: env_string("COLLECTION_NAME", "documents"),
            qna_collection_name: env_string("QNA_COLLECTION_NAME", "documents_qna"),
            embedding: EmbeddingConfig {
                api_url: embedding_api_url,
                model: env_string("EMBEDDING_MODEL", "text-embedding-3-small"),
                dimensions: env_usize("EMBEDDING_DIMENSIONS", 512)?,
                qna_dimensions: env_usize("EMBEDDING_QNA_DIMENSIONS", 1024)?,
                requests_per_second: env_usize("EMBEDDING_RATE_LIMIT_QPS", 5)? as u32,
            },
            llm: LlmConfig {
                api_url: llm_api_url,
                api_key: env::var("LLM_API_KEY").ok(),
                model: env_string("LLM_MODEL", "gpt-4o-mini"),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            rerank: RerankConfig::default(),
            assembler: AssemblerConfig::default(),
            debug: DebugConfig {
                rag: env_flag("DEBUG_RAG"),
                rag_full: env_flag("DEBUG_RAG_FULL"),
            },
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8080"),
            mojibake_repair: env_flag("MOJIBAKE_REPAIR"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimensions == 0 || self.embedding.qna_dimensions == 0 {
            return Err("embedding dimensions must be > 0".into());
        }
        if self.embedding.requests_per_second == 0 {
            return Err("embedding.requests_per_second must be > 0".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("chunking.chunk_overlap must be < chunk_size".into());
        }
        if !(0.0..=1.0).contains(&self.chunking.qna_min_coverage) {
            return Err("chunking.qna_min_coverage must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err("retrieval.mmr_lambda must be in [0.0, 1.0]".into());
        }
        if self.rerank.max_concurrent_batches == 0 {
            return Err("rerank.max_concurrent_batches must be > 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_embedding_dimension() {
        let mut cfg = test_config();
        cfg.embedding.dimensions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        let mut cfg = test_config();
        cfg.chunking.chunk_overlap = cfg.chunking.chunk_size;
        assert!(cfg.validate().is_err());
    }

    fn test_config() -> RagConfig {
        RagConfig {
            vector_db_host: "http://localhost:1234".into(),
            vector_db_api_key: None,
            collection_name: "documents".into(),
            qna_collection_name: "documents_qna".into(),
            embedding: EmbeddingConfig {
                api_url: "http://localhost/embed".into(),
                model: "test".into(),
                dimensions: 512,
                qna_dimensions: 1024,
                requests_per_second: 5,
            },
            llm: LlmConfig {
                api_url: "http://localhost/llm".into(),
                api_key: None,
                model: "test".into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            rerank: RerankConfig::default(),
            assembler: AssemblerConfig::default(),
            debug: DebugConfig::default(),
            bind_addr: "0.0.0.0:8080".into(),
            mojibake_repair: false,
        }
    }
}
