use std::sync::Arc;

use preguntas_rag::config::RagConfig;
use preguntas_rag::embedder::Embedder;
use preguntas_rag::http::{router, AppState};
use preguntas_rag::ingest::{IngestContext, JobQueue};
use preguntas_rag::llm::LlmClient;
use preguntas_rag::pipeline::QueryEngine;
use preguntas_rag::search::HybridSearchClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RagConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

    let search = Arc::new(HybridSearchClient::new(&config, &data_dir).await?);
    search.ensure_both_collections_exist().await?;

    let embedder = Arc::new(Embedder::new(config.embedding.clone())?);
    let llm = Arc::new(LlmClient::new(config.llm.clone())?);

    let engine = Arc::new(QueryEngine::new(config.clone(), search.clone(), embedder.clone(), llm.clone()));

    let ingest_ctx = Arc::new(IngestContext {
        config: config.clone(),
        search: search.clone(),
        embedder: embedder.clone(),
        llm: llm.clone(),
    });
    let jobs = Arc::new(JobQueue::spawn(move |payload, progress| {
        let ctx = ingest_ctx.clone();
        async move { preguntas_rag::ingest::run(&ctx, payload, progress).await }
    }));

    let state = AppState { engine, jobs };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
