//! HTTP embedding client. Two call shapes — regular-dimension and
//! QnA-dimension — hit the same configured endpoint with a different
//! `dimensions` request field, matching the dual-collection design (§3).
//!
//! Every call passes through a shared token-bucket rate limiter (§5 "Shared
//! Resources") and gets one retry before the failure propagates (§7
//! "Embedding failure").

use std::num::NonZeroU32;

use anyhow::{anyhow, Result};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::EmbeddingConfig;

type Limiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

pub struct Embedder {
    client: Client,
    config: EmbeddingConfig,
    limiter: Limiter,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl Embedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()?;
        let qps = NonZeroU32::new(config.requests_per_second)
            .ok_or_else(|| anyhow!("embedding.requests_per_second must be > 0"))?;
        let limiter = RateLimiter::direct(Quota::per_second(qps));
        Ok(Self { client, config, limiter })
    }

    pub async fn embed_regular(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, self.config.dimensions).await
    }

    pub async fn embed_qna(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, self.config.qna_dimensions).await
    }

    async fn embed(&self, text: &str, dimensions: usize) -> Result<Vec<f32>> {
        match self.embed_once(text, dimensions).await {
            Ok(vector) => Ok(vector),
            Err(first_err) => {
                tracing::warn!(error = %first_err, "embedding call failed, retrying once");
                self.embed_once(text, dimensions).await.map_err(|retry_err| {
                    anyhow!("embedding request failed twice: first={first_err}; retry={retry_err}")
                })
            }
        }
    }

    async fn embed_once(&self, text: &str, dimensions: usize) -> Result<Vec<f32>> {
        self.limiter.until_ready().await;

        let request = json!(EmbeddingRequest {
            model: &self.config.model,
            input: text,
            dimensions,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("embedding request to {} timed out", self.config.api_url)
                } else {
                    anyhow!("embedding request to {} failed: {}", self.config.api_url, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("embedding API error ({}): {}", status, body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse embedding response: {}", e))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding response had no data"))?
            .embedding;

        if vector.len() != dimensions {
            return Err(anyhow!(
                "embedding API returned {} dims, expected {}",
                vector.len(),
                dimensions
            ));
        }

        Ok(vector)
    }
}
