pub mod assemble;
pub mod citation;
pub mod classify;
pub mod config;
pub mod embedder;
pub mod error;
pub mod expand;
pub mod http;
pub mod ingest;
pub mod listdetect;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod reranking;
pub mod retrieval;
pub mod search;
pub mod storage;
pub mod types;

pub use config::RagConfig;
pub use error::RagError;
pub use pipeline::{QueryAnswer, QueryEngine, QueryResult};
pub use types::{Chunk, ClassifiedQuery, ContextBundle, RefusalReason, RetrievalHit};

pub use anyhow::{Error, Result};
pub use uuid::Uuid;
