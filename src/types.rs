//! Core data model: chunks, retrieval hits, and the query-scoped types that
//! flow between pipeline stages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A unit of retrieval. Immutable once written to a collection.
///
/// Field names intentionally match the external vector-DB schema so that
/// storage code can serialize this struct directly rather than building an
/// intermediate map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub prev_chunk_index: Option<u32>,
    pub next_chunk_index: Option<u32>,
    pub page_number: Option<u32>,
    pub source_namespace: String,
    pub upload_date: String,
    pub language: String,
    pub content_without_overlap: String,
    pub is_qa_pair: bool,
    pub question_text: Option<String>,
    pub start_position: u32,
    pub end_position: u32,
}

impl Chunk {
    /// `Página N` if a page number is known, otherwise falls back to the
    /// chunk index (1-based) so context assembly always has a stable key.
    pub fn page_label(&self) -> u32 {
        self.page_number.unwrap_or(self.chunk_index + 1)
    }
}

/// A single match returned by the hybrid search client, scoped to one query.
///
/// The spec's source reads chunk fields from either `hit.properties.X` or
/// `hit.X` (a prototype-chain-style lookup). Here `properties` is the single,
/// explicit accessor — there is no second path to the same data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalHit {
    pub id: String,
    pub properties: Chunk,
    pub score: f32,
    pub final_score: f32,
    pub boost: f32,
    pub source_boost: f32,
    pub is_window_expansion: bool,
}

impl RetrievalHit {
    pub fn new(id: impl Into<String>, properties: Chunk, score: f32) -> Self {
        Self {
            id: id.into(),
            properties,
            score,
            final_score: score,
            boost: 0.0,
            source_boost: 0.0,
            is_window_expansion: false,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.properties.source_name
    }

    pub fn chunk_index(&self) -> u32 {
        self.properties.chunk_index
    }
}

/// The logical namespace a chunk belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Collection {
    Regular,
    QnA,
}

impl Collection {
    pub fn for_chunk(chunk: &Chunk) -> Self {
        if chunk.is_qa_pair {
            Collection::QnA
        } else {
            Collection::Regular
        }
    }
}

/// The four question-intent tags the classifier can produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Numeric,
    List,
    OrderedSequence,
    ReglaGeneral,
}

/// The fusion strategy a `ClassifiedQuery` requests from the hybrid search
/// client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FusionStrategy {
    RankedFusion,
    RelativeScoreFusion,
}

/// A query after classification: its two search-facing projections plus the
/// hybrid-search tuning the classifier derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedQuery {
    pub raw_query: String,
    pub embed_query: String,
    pub bm25_query: String,
    pub query_type: QuestionType,
    pub alpha: f32,
    pub fusion: FusionStrategy,
    pub target_chunks: usize,
}

/// The assembled context handed to the prompt builder, and the only string
/// citation validation reads from.
///
/// `context_by_key` is keyed by `"Página N"`. Two distinct chunks that share
/// a page number are concatenated under the same key, so callers must not
/// assume a one-to-one chunk-to-key mapping — only that the key's text is
/// exactly what the LLM was shown for that page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextBundle {
    pub context: String,
    pub used_chunks: usize,
    pub sources: Vec<String>,
    pub context_by_key: HashMap<String, String>,
}

/// A citation as parsed out of a generated answer, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedCitation {
    pub source_key: String,
    pub quote: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Extracting,
    Chunking,
    Embedding,
    Saving,
    Done,
}

/// The state of one ingestion job, polled via `GET /job/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: u8,
    pub ocr_page: Option<u32>,
    pub ocr_total_pages: Option<u32>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            stage: JobStage::Extracting,
            progress: 0,
            ocr_page: None,
            ocr_total_pages: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
            error: None,
        }
    }
}

/// File extension dispatch for ingestion readers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentFormat {
    Txt,
    Md,
    Json,
    Pdf,
    Docx,
    Image,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" => Some(Self::Txt),
            "md" | "markdown" => Some(Self::Md),
            "json" => Some(Self::Json),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "png" | "jpg" | "jpeg" | "webp" | "tiff" | "bmp" => Some(Self::Image),
            _ => None,
        }
    }
}

/// The refusal reasons surfaced on `POST /query` when a gate short-circuits
/// the pipeline (§4.10).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    NoChunks,
    NoEntailmentsAfterRerank,
    LlmFilterZeroRelevant,
}
