use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Core trait for generative text backends (local or remote)
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Probe whether the backend is reachable and serves the configured model.
    /// Callers probe once and cache the answer.
    async fn is_available(&self) -> bool;
}

/// Text embedding backend used for near-duplicate detection.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

impl LlmRequest {
    /// A short, low-randomness request, as used for classification and scoring.
    pub fn constrained(prompt: String, max_tokens: usize, temperature: f32) -> Self {
        Self {
            prompt,
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            timeout_seconds: None,
        }
    }
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod remote;

/// Run one generation bounded by `timeout`, whatever the backend's own
/// timeout handling is. Expiry is reported as an error like any backend failure.
pub async fn generate_with_timeout(
    provider: &dyn LlmProvider,
    request: LlmRequest,
    timeout: std::time::Duration,
) -> Result<String> {
    let response = tokio::time::timeout(timeout, provider.generate(request))
        .await
        .map_err(|_| anyhow::anyhow!("LLM call timed out after {:?}", timeout))??;
    Ok(response.content)
}

/// Model names match when equal after dropping any `:tag` suffix
/// (`qwen2.5:7b` is served as `qwen2.5:7b` or `qwen2.5:latest`).
pub fn model_matches(configured: &str, served: &str) -> bool {
    let base = configured.split(':').next().unwrap_or(configured);
    let served_base = served.split(':').next().unwrap_or(served);
    !base.is_empty() && base == served_base
}
