//! Ingestion pipeline orchestration (§4.11): Extracting -> Chunking ->
//! Embedding -> Saving -> Done, driving one `JobProgress` handle through
//! the whole lifecycle of a single document.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::RagConfig;
use crate::embedder::Embedder;
use crate::llm::LlmClient;
use crate::search::HybridSearchClient;
use crate::types::{Chunk, Collection, DocumentFormat, JobStage};

use super::chunker::chunk_document;
use super::job::{IngestPayload, JobProgress};
use super::readers::read_document;

pub struct IngestContext {
    pub config: RagConfig,
    pub search: Arc<HybridSearchClient>,
    pub embedder: Arc<Embedder>,
    pub llm: Arc<LlmClient>,
}

/// Runs one document end to end. On success, the document's chunks are
/// inserted into whichever collection (Regular or QnA) each chunk belongs
/// to; any prior chunks from the same `source_name` are deleted first, so
/// re-ingesting a file always replaces rather than duplicates.
pub async fn run(ctx: &IngestContext, payload: IngestPayload, progress: JobProgress) {
    let result = run_inner(ctx, &payload, &progress).await;
    match result {
        Ok(()) => progress.complete(),
        Err(e) => {
            tracing::warn!(job_id = %payload.job_id, filename = %payload.filename, error = %e, "ingestion failed");
            progress.fail(e.to_string());
        }
    }
}

async fn run_inner(ctx: &IngestContext, payload: &IngestPayload, progress: &JobProgress) -> Result<()> {
    progress.set_stage(JobStage::Extracting, 10);

    let format = DocumentFormat::from_extension(extension_of(&payload.filename))
        .ok_or_else(|| anyhow!("unsupported file extension for {}", payload.filename))?;

    let tmp_path = write_to_temp(&payload.filename, &payload.bytes)?;
    let extracted = read_document(&tmp_path, format, payload.use_ocr, &ctx.llm).await?;
    let _ = std::fs::remove_file(&tmp_path);
    progress.set_stage(JobStage::Extracting, 30);

    if extracted.text.trim().is_empty() {
        return Err(anyhow!("extraction produced no text for {}", payload.filename));
    }

    progress.set_stage(JobStage::Chunking, 35);
    let raw_chunks = chunk_document(&extracted.text, &payload.filename, &ctx.config.chunking);
    if raw_chunks.is_empty() {
        return Err(anyhow!("chunking produced zero chunks for {}", payload.filename));
    }
    progress.set_stage(JobStage::Chunking, 50);

    let total = raw_chunks.len() as u32;
    let now = chrono::Utc::now().to_rfc3339();
    let mut chunks: Vec<Chunk> = Vec::with_capacity(raw_chunks.len());
    for (i, raw) in raw_chunks.into_iter().enumerate() {
        let index = i as u32;
        chunks.push(Chunk {
            text: raw.text,
            source_name: payload.filename.clone(),
            chunk_index: index,
            total_chunks: total,
            prev_chunk_index: index.checked_sub(1),
            next_chunk_index: if index + 1 < total { Some(index + 1) } else { None },
            page_number: None,
            source_namespace: String::new(),
            upload_date: now.clone(),
            language: "es".to_string(),
            content_without_overlap: raw.content_without_overlap,
            is_qa_pair: raw.is_qa_pair,
            question_text: raw.question_text,
            start_position: raw.start_position,
            end_position: raw.end_position,
        });
    }

    progress.set_stage(JobStage::Embedding, 55);
    let mut embedded_regular: Vec<(String, Chunk, Vec<f32>)> = Vec::new();
    let mut embedded_qna: Vec<(String, Chunk, Vec<f32>)> = Vec::new();

    let embed_total = chunks.len().max(1);
    for (i, chunk) in chunks.into_iter().enumerate() {
        let id = format!("{}-{}", payload.filename, chunk.chunk_index);
        match ctx.search.collection_for(&chunk) {
            Collection::Regular => {
                let vector = ctx.embedder.embed_regular(&chunk.text).await?;
                embedded_regular.push((id, chunk, vector));
            }
            Collection::QnA => {
                let vector = ctx.embedder.embed_qna(&chunk.text).await?;
                embedded_qna.push((id, chunk, vector));
            }
        }
        let fraction = (i + 1) as f32 / embed_total as f32;
        progress.set_stage(JobStage::Embedding, 55 + (fraction * 25.0) as u8);
    }

    progress.set_stage(JobStage::Saving, 82);
    ctx.search.ensure_both_collections_exist().await?;
    ctx.search.delete_by_filter("source_name", &payload.filename).await.ok();
    ctx.search.delete_by_filter_qna("source_name", &payload.filename).await.ok();

    if !embedded_regular.is_empty() {
        ctx.search.insert_batch(embedded_regular).await?;
    }
    if !embedded_qna.is_empty() {
        ctx.search.insert_batch_qna(embedded_qna).await?;
    }
    progress.set_stage(JobStage::Saving, 90);

    Ok(())
}

fn extension_of(filename: &str) -> &str {
    Path::new(filename).extension().and_then(|e| e.to_str()).unwrap_or("")
}

fn write_to_temp(filename: &str, bytes: &[u8]) -> Result<std::path::PathBuf> {
    let dir = std::env::temp_dir();
    let safe_name = format!("{}-{}", uuid::Uuid::new_v4(), filename.replace('/', "_"));
    let path = dir.join(safe_name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}
