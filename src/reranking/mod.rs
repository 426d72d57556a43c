pub mod llm_reranker;

pub use llm_reranker::{rerank, RerankDecision, RerankLabel, RerankOutcome};
