use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::{model_matches, Embedder, LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

/// Remote LLM provider using OpenAI-compatible HTTP API
/// (OpenAI itself, or Ollama's `/v1` endpoints).
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 500,
            default_temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(
        mut self,
        timeout_secs: u64,
        max_tokens: usize,
        temperature: f32,
    ) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Derive a sibling endpoint from the configured chat URL, e.g.
    /// `http://localhost:11434/v1/chat/completions` -> `http://localhost:11434/v1/embeddings`.
    fn endpoint(&self, name: &str) -> String {
        let url = self.base_url.trim_end_matches('/');
        for suffix in ["/chat/completions", "/completions", "/embeddings", "/models"] {
            if let Some(root) = url.strip_suffix(suffix) {
                return format!("{}/{}", root, name);
            }
        }
        format!("{}/{}", url, name)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    async fn served_models(&self) -> Result<Vec<String>> {
        let url = self.endpoint("models");
        let response = tokio::time::timeout(
            self.default_timeout,
            self.authorized(self.client.get(&url)).send(),
        )
        .await
        .context("Model listing timed out")?
        .context("Model listing HTTP request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Model listing error {} (URL: {})", response.status(), url);
        }

        let body: ModelList = response.json().await.context("Failed to parse model listing")?;
        Ok(body.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let max_tokens = request.max_tokens.unwrap_or(self.default_max_tokens);
        let temperature = request.temperature.unwrap_or(self.default_temperature);

        let req_body = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt,
            }],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
        };

        let response = tokio::time::timeout(
            timeout,
            self.authorized(self.client.post(&self.base_url))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .context("LLM request timed out")?
        .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let resp_body: OpenAiResponse = tokio::time::timeout(timeout, response.json())
            .await
            .context("LLM response body timed out")?
            .context("Failed to parse LLM response")?;

        let choice = resp_body
            .choices
            .first()
            .context("LLM response has no choices")?;

        let usage = resp_body
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content.clone(),
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn is_available(&self) -> bool {
        match self.served_models().await {
            Ok(models) => {
                if models.iter().any(|m| model_matches(&self.model, m)) {
                    info!(model = %self.model, "LLM model available");
                    true
                } else {
                    warn!(model = %self.model, served = ?models, "configured LLM model is not served");
                    false
                }
            }
            Err(e) => {
                warn!(%e, "LLM backend unreachable");
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl Embedder for RemoteLlmProvider {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let embedding_url = self.endpoint("embeddings");

        let req_body = EmbeddingRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };

        let response = tokio::time::timeout(
            self.default_timeout,
            self.authorized(self.client.post(&embedding_url))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .context("Embedding request timed out")?
        .context("Embedding HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error {}: {} (URL: {})", status, body, embedding_url);
        }

        let body_text = response.text().await.context("Failed to read embedding response body")?;

        match serde_json::from_str::<EmbeddingResponse>(&body_text) {
            Ok(resp_body) => {
                if let Some(first) = resp_body.data.into_iter().next() {
                    return Ok(first.embedding);
                }
            }
            Err(e) => {
                // Some providers answer with a bare object or list instead of the OpenAI envelope
                if let Ok(raw_vec) = serde_json::from_str::<Vec<f32>>(&body_text) {
                    return Ok(raw_vec);
                }
                #[derive(Deserialize)]
                struct SingleEmbed {
                    embedding: Vec<f32>,
                }
                if let Ok(single) = serde_json::from_str::<SingleEmbed>(&body_text) {
                    return Ok(single.embedding);
                }

                anyhow::bail!("Failed to parse Embedding response: {} (Body: {})", e, body_text);
            }
        }

        anyhow::bail!("Embedding response has no data: {}", body_text);
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_endpoints() {
        let p = RemoteLlmProvider::new("http://localhost:11434/v1/chat/completions", "", "qwen2.5");
        assert_eq!(p.endpoint("models"), "http://localhost:11434/v1/models");
        assert_eq!(p.endpoint("embeddings"), "http://localhost:11434/v1/embeddings");

        let p = RemoteLlmProvider::new("http://127.0.0.1:1234/", "", "m");
        assert_eq!(p.endpoint("models"), "http://127.0.0.1:1234/models");
    }
}
