//! HTTP surface: axum routes wired to the query pipeline and the
//! ingestion job queue.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::ingest::JobQueue;
use crate::pipeline::QueryEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub jobs: Arc<JobQueue>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/query", post(handlers::query))
        .route("/upload", post(handlers::upload))
        .route("/job/:id", get(handlers::job_status))
        .with_state(state)
}
