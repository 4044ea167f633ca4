//! Outbound typed provider contracts (§6): the pipeline and query service
//! never hold a concrete HTTP client, only a `dyn EmbeddingProvider` / `dyn
//! LlmProvider`, so swapping backends never touches business logic.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::embedding::{Embedder, TfIdfEmbedder};
use crate::error::{MemoryCoreError, Result};

/// Async embedding backend.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, texts: &[&str]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;

    fn dimensions(&self) -> usize;
}

/// Async classification/generation backend for TagTopics, ExtractEntities,
/// and `Query Service::optimize_query`.
pub trait LlmProvider: Send + Sync {
    fn classify(&self, text: &str, taxonomy: &[String]) -> BoxFuture<'_, Result<Vec<String>>>;

    fn generate(&self, prompt: &str, model: &str, max_tokens: usize) -> BoxFuture<'_, Result<String>>;
}

/// Token bucket rate limiter shared by a provider's outbound calls. Refilled
/// lazily on each `acquire` rather than a background ticker, to stay correct
/// even if nothing calls the provider for a while.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_second: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_second,
        }
    }

    /// Blocks the calling task until a token is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_second))
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

/// Wraps the deterministic, dependency-free TF-IDF embedder behind the async
/// contract. Ships unconditionally as the default provider.
pub struct TfIdfEmbeddingProvider {
    embedder: TfIdfEmbedder,
}

impl TfIdfEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            embedder: TfIdfEmbedder::new(dimensions),
        }
    }
}

impl EmbeddingProvider for TfIdfEmbeddingProvider {
    fn embed(&self, texts: &[&str]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let result = self.embedder.embed_batch(texts);
        Box::pin(async move { result })
    }

    fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }
}

/// A fixed-output double used in tests and as a dependency-free default:
/// `classify` echoes back up to the first three taxonomy entries whose
/// lowercase form appears as a substring of the input; `generate` returns a
/// truncated echo of the prompt. Never makes network calls.
pub struct DeterministicLlmProvider;

impl LlmProvider for DeterministicLlmProvider {
    fn classify(&self, text: &str, taxonomy: &[String]) -> BoxFuture<'_, Result<Vec<String>>> {
        let lower = text.to_lowercase();
        let hits: Vec<String> = taxonomy
            .iter()
            .filter(|t| lower.contains(&t.to_lowercase()))
            .take(3)
            .cloned()
            .collect();
        Box::pin(async move { Ok(hits) })
    }

    fn generate(&self, prompt: &str, _model: &str, max_tokens: usize) -> BoxFuture<'_, Result<String>> {
        let cap = max_tokens.saturating_mul(4).max(1);
        let out = prompt.chars().take(cap).collect::<String>();
        Box::pin(async move { Ok(out) })
    }
}

#[cfg(feature = "openai")]
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    limiter: Arc<RateLimiter>,
}

#[cfg(feature = "openai")]
impl OpenAiEmbeddingProvider {
    pub fn new(api_key: String, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            dimensions,
            limiter: Arc::new(RateLimiter::new(60, 1.0)),
        }
    }
}

#[cfg(feature = "openai")]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn embed(&self, texts: &[&str]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(vec![]);
            }
            self.limiter.acquire().await;

            let response = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&serde_json::json!({ "input": texts, "model": self.model }))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(MemoryCoreError::ProviderFailure(format!(
                    "openai embeddings {status}: {body}"
                )));
            }

            let data: serde_json::Value = response.json().await?;
            let embeddings = data["data"]
                .as_array()
                .ok_or_else(|| MemoryCoreError::ProviderFailure("malformed embeddings response".into()))?
                .iter()
                .map(|item| {
                    item["embedding"]
                        .as_array()
                        .map(|arr| arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
                        .unwrap_or_default()
                })
                .collect();
            Ok(embeddings)
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(feature = "openai")]
pub struct OpenAiLlmProvider {
    client: reqwest::Client,
    api_key: String,
    limiter: Arc<RateLimiter>,
}

#[cfg(feature = "openai")]
impl OpenAiLlmProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            limiter: Arc::new(RateLimiter::new(60, 1.0)),
        }
    }
}

#[cfg(feature = "openai")]
impl LlmProvider for OpenAiLlmProvider {
    fn classify(&self, text: &str, taxonomy: &[String]) -> BoxFuture<'_, Result<Vec<String>>> {
        let prompt = format!(
            "Classify the following text into zero or more of these topics: {}.\nText: {}\nRespond with a comma-separated list of matching topics only.",
            taxonomy.join(", "),
            text
        );
        Box::pin(async move {
            let raw = self.generate(&prompt, "gpt-4o-mini", 128).await?;
            Ok(raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect())
        })
    }

    fn generate(&self, prompt: &str, model: &str, max_tokens: usize) -> BoxFuture<'_, Result<String>> {
        let prompt = prompt.to_string();
        let model = model.to_string();
        Box::pin(async move {
            self.limiter.acquire().await;

            let response = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&serde_json::json!({
                    "model": model,
                    "max_tokens": max_tokens,
                    "messages": [{ "role": "user", "content": prompt }],
                }))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(MemoryCoreError::ProviderFailure(format!(
                    "openai chat completions {status}: {body}"
                )));
            }

            let data: serde_json::Value = response.json().await?;
            data["choices"][0]["message"]["content"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| MemoryCoreError::ProviderFailure("malformed chat completion response".into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tfidf_provider_embeds_batch() {
        let provider = TfIdfEmbeddingProvider::new(64);
        let out = provider.embed(&["hello", "world"]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 64);
    }

    #[tokio::test]
    async fn deterministic_llm_classifies_by_substring() {
        let provider = DeterministicLlmProvider;
        let taxonomy = vec!["cooking".to_string(), "finance".to_string()];
        let hits = provider
            .classify("we talked about cooking dinner", &taxonomy)
            .await
            .unwrap();
        assert_eq!(hits, vec!["cooking".to_string()]);
    }

    #[tokio::test]
    async fn rate_limiter_allows_burst_up_to_capacity() {
        let limiter = RateLimiter::new(2, 1000.0);
        limiter.acquire().await;
        limiter.acquire().await;
    }
}
