use std::time::Instant;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RagError;
use crate::pipeline::QueryResult;
use crate::types::{Job, RefusalReason};

use super::AppState;

pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub message_id: String,
    pub query: String,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: Option<String>,
    #[serde(rename = "modelId")]
    pub model_id: Option<String>,
    pub temperature: Option<f32>,
    pub contacts: Option<Value>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub query: String,
    pub answer: String,
    #[serde(rename = "modelId")]
    pub model_id: String,
    pub provider: &'static str,
    #[serde(rename = "chunksUsed")]
    pub chunks_used: usize,
    #[serde(rename = "chunksTotal")]
    pub chunks_total: usize,
    pub sources: Vec<String>,
    #[serde(rename = "wasRefused")]
    pub was_refused: bool,
    #[serde(rename = "refusalReason", skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<RefusalReason>,
    #[serde(rename = "processingTimeMs")]
    pub processing_time_ms: u128,
}

pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, RagError> {
    if request.query.trim().is_empty() {
        return Err(RagError::BadRequest("query must not be empty".into()));
    }

    let started = Instant::now();
    let model_id = request
        .model_id
        .clone()
        .unwrap_or_else(|| state.engine.model_id().to_string());

    match state.engine.answer(&request.query).await {
        Ok(QueryResult::Answered(answer)) => Ok(Json(QueryResponse {
            success: true,
            query: request.query,
            answer: answer.answer,
            model_id,
            provider: "preguntas-rag",
            chunks_used: answer.chunks_used,
            chunks_total: answer.chunks_total,
            sources: answer.sources,
            was_refused: false,
            refusal_reason: None,
            processing_time_ms: started.elapsed().as_millis(),
        })),
        Ok(QueryResult::Refused(reason)) => Ok(Json(QueryResponse {
            success: true,
            query: request.query,
            answer: crate::prompt::ABSENT_PHRASE_EXPLICIT.to_string(),
            model_id,
            provider: "preguntas-rag",
            chunks_used: 0,
            chunks_total: 0,
            sources: Vec::new(),
            was_refused: true,
            refusal_reason: Some(reason),
            processing_time_ms: started.elapsed().as_millis(),
        })),
        Err(e) => Err(RagError::Generation(e.to_string())),
    }
}

#[derive(Serialize)]
pub struct ProcessedFile {
    pub filename: String,
    pub size: usize,
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub queued: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(rename = "processedFiles")]
    pub processed_files: Vec<ProcessedFile>,
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, RagError> {
    let mut use_ocr = false;
    let mut processed = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RagError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "useOcr" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| RagError::BadRequest(e.to_string()))?;
                use_ocr = value == "1" || value.eq_ignore_ascii_case("true");
            }
            "namespace" => {
                let _ = field.text().await;
            }
            "files" | "files[]" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| RagError::BadRequest("missing filename".into()))?;
                let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| RagError::BadRequest(e.to_string()))?
                    .to_vec();
                let size = bytes.len();
                let job_id = state.jobs.add(filename.clone(), bytes, use_ocr);
                processed.push(ProcessedFile {
                    filename,
                    size,
                    content_type,
                    job_id,
                    queued: true,
                    message: "queued for ingestion".to_string(),
                });
            }
            _ => {}
        }
    }

    if processed.is_empty() {
        return Err(RagError::BadRequest("no files provided".into()));
    }

    Ok(Json(UploadResponse { success: true, processed_files: processed }))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, RagError> {
    state
        .jobs
        .get_status(&id)
        .map(Json)
        .ok_or_else(|| RagError::JobNotFound(id))
}
