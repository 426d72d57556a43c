//! Generation client: one OpenAI-compatible HTTP endpoint used for
//! reranking, answer generation, and citation repair calls. The teacher
//! supported a dozen hosted providers behind a trait object; this service
//! is configured against exactly one endpoint (§6), so the trait collapses
//! to a single struct.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::LlmConfig;

pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(120))
            .tcp_nodelay(true)
            .build()?;
        Ok(Self { client, config })
    }

    /// Plain system+user completion. `max_tokens`/`temperature` are per-call
    /// since reranking wants short, low-temperature output and final answer
    /// generation wants longer, slightly warmer output.
    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature,
            stream: false,
        };

        let mut builder = self.client.post(&self.config.api_url).json(&json!(request));
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow!("LLM request to {} timed out", self.config.api_url)
            } else if e.is_connect() {
                anyhow!("failed to connect to LLM endpoint {}: {}", self.config.api_url, e)
            } else {
                anyhow!("LLM request to {} failed: {}", self.config.api_url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API error ({}): {}", status, body));
        }

        let body = response.text().await?;
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "LLM endpoint returned HTML instead of JSON: {}",
                preview
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!("failed to parse LLM response: {}. Body: {}", e, preview)
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("LLM returned no choices"))
    }
}
