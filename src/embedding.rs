//! Embedding provider abstraction and the cache-first generator.
//!
//! [`EmbeddingProvider`] is the boundary to the external embedding function:
//! - **[`HttpProvider`]** — calls a hosted embeddings API with retry and
//!   backoff.
//! - **`LocalProvider`** — runs MiniLM-L6-v2 in-process via fastembed
//!   (behind the `local-embeddings-fastembed` feature). This is the model
//!   the hosted deployment uses, D=384.
//!
//! [`EmbeddingGenerator`] wraps a provider with the content-addressed cache
//! and usage counters: blank text short-circuits to the zero vector, cache
//! hits return without an external call, and every miss is L2-normalized,
//! cached, and counted.
//!
//! # Retry Strategy
//!
//! The HTTP provider retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::cache::{CacheScope, CacheStats, EmbeddingCache};
use crate::config::EmbeddingConfig;
use crate::error::EngineError;
use crate::stats::UsageCounters;

/// Boundary to the external embedding function.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"all-MiniLM-L6-v2"`).
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed one text. Implementations do not normalize; the generator does.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// L2-normalize an embedding to unit length.
///
/// A zero-norm vector is returned unchanged — the zero vector is the blank-text
/// sentinel and must survive normalization.
pub fn normalize_embedding(embedding: Vec<f32>) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return embedding;
    }
    embedding.into_iter().map(|x| x / norm).collect()
}

// ============ HTTP Provider ============

/// Embedding provider backed by a hosted embeddings API.
///
/// Sends `POST {endpoint}` with `{"model": ..., "input": [text]}` and reads
/// the embedding from `data[0].embedding` — the wire shape shared by OpenAI-
/// compatible embedding services.
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    api_key: Option<String>,
    max_retries: u32,
}

impl HttpProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.endpoint required for the http provider"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for the http provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            dims: config.dims,
            api_key: std::env::var(&config.api_key_env).ok(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Extract `data[0].embedding` from an embeddings API response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data[0].embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Local Provider (fastembed) ============

/// In-process embeddings via fastembed's bundled MiniLM-L6-v2 (D=384).
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model: Mutex<fastembed::TextEmbedding>,
    model_name: String,
    dims: usize,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = fastembed::TextEmbedding::try_new(Default::default())?;
        Ok(Self {
            model: Mutex::new(model),
            model_name: config
                .model
                .clone()
                .unwrap_or_else(|| "all-MiniLM-L6-v2".to_string()),
            dims: config.dims,
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_string();
        // ONNX inference is CPU-bound; keep it off the async worker threads.
        tokio::task::block_in_place(|| {
            let mut model = self
                .model
                .lock()
                .map_err(|_| anyhow::anyhow!("embedding model mutex poisoned"))?;
            let mut vectors = model.embed(vec![text], None)?;
            vectors
                .pop()
                .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
        })
    }
}

/// Create the configured [`EmbeddingProvider`].
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "http" => Ok(Box::new(HttpProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "embedding.provider = 'local' requires the local-embeddings-fastembed feature"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Generator ============

/// Produces unit-length embeddings of a fixed dimension, cache-first.
pub struct EmbeddingGenerator {
    provider: Box<dyn EmbeddingProvider>,
    cache: Mutex<EmbeddingCache>,
    counters: Arc<UsageCounters>,
    dims: usize,
}

impl EmbeddingGenerator {
    pub fn new(
        provider: Box<dyn EmbeddingProvider>,
        cache_size: usize,
        counters: Arc<UsageCounters>,
    ) -> Self {
        let dims = provider.dims();
        Self {
            provider,
            cache: Mutex::new(EmbeddingCache::new(cache_size)),
            counters,
            dims,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed indexed content.
    pub async fn embed_document(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        self.embed_scoped(CacheScope::Document, text).await
    }

    /// Embed a search query. Cached under a separate key space so a query
    /// never aliases identical indexed content.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        self.embed_scoped(CacheScope::Query, text).await
    }

    async fn embed_scoped(&self, scope: CacheScope, text: &str) -> Result<Vec<f32>, EngineError> {
        // Blank text maps to the zero vector — a sentinel, not an error.
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dims]);
        }

        if let Some(cached) = self.lock_cache().get(scope, text) {
            return Ok(cached);
        }

        let raw = self
            .provider
            .embed(text)
            .await
            .map_err(EngineError::Embedding)?;
        let normalized = normalize_embedding(raw);

        self.lock_cache().put(scope, text, normalized.clone());
        self.counters.record_embedding();

        Ok(normalized)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    /// Drop every cached embedding. Returns how many entries were held.
    pub fn clear_cache(&self) -> usize {
        self.lock_cache().clear()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, EmbeddingCache> {
        // Cache operations cannot panic mid-update; recover from poisoning
        // rather than failing every later embed.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedProvider {
        calls: AtomicU64,
        output: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    fn generator(output: Vec<f32>) -> (EmbeddingGenerator, Arc<UsageCounters>) {
        let counters = Arc::new(UsageCounters::new());
        let provider = Box::new(FixedProvider {
            calls: AtomicU64::new(0),
            output,
        });
        (
            EmbeddingGenerator::new(provider, 100, counters.clone()),
            counters,
        )
    }

    #[test]
    fn normalize_produces_unit_length() {
        let v = normalize_embedding(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        assert_eq!(normalize_embedding(vec![0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn blank_text_yields_zero_vector_without_a_call() {
        let (gen, counters) = generator(vec![1.0, 0.0, 0.0]);
        let v = gen.embed_document("   \t\n").await.unwrap();
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
        assert_eq!(counters.embedding_calls(), 0);
    }

    #[tokio::test]
    async fn cache_hit_skips_provider_and_counter() {
        let (gen, counters) = generator(vec![2.0, 0.0, 0.0]);

        let first = gen.embed_document("hello").await.unwrap();
        assert_eq!(first, vec![1.0, 0.0, 0.0]); // normalized
        assert_eq!(counters.embedding_calls(), 1);

        let second = gen.embed_document("hello").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(counters.embedding_calls(), 1);

        let stats = gen.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn query_and_document_embeddings_do_not_alias() {
        let (gen, counters) = generator(vec![1.0, 1.0, 0.0]);
        gen.embed_document("same text").await.unwrap();
        gen.embed_query("same text").await.unwrap();
        // Two misses: the scopes are cached independently.
        assert_eq!(counters.embedding_calls(), 2);
    }
}
