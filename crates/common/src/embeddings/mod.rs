//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible HTTP endpoints (text-embedding-3-small, -large, ada-002)
//! - A deterministic feature-hashing embedder for tests and offline runs
//!
//! Texts are cleaned (trimmed, whitespace collapsed) before embedding. If
//! every text cleans to nothing the call fails with `EmptyInput` so callers
//! can skip instead of retrying.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, aligned with the input
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Trim and collapse internal whitespace
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Exponential backoff bounded by attempt count
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every following one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delays of `base_delay`, then doubling, with no jitter and no
    /// elapsed-time cap; the attempt count is enforced by `run`
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Run `op` until it succeeds or the retries are used up
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 0_u32;

        let result = retry_notify(
            self.backoff(),
            || {
                attempt += 1;
                let last = attempt >= max_attempts;
                let fut = op();
                async move {
                    fut.await.map_err(|e| {
                        if last {
                            backoff::Error::permanent(e)
                        } else {
                            backoff::Error::transient(e)
                        }
                    })
                }
            },
            |e: AppError, delay: Duration| {
                tracing::warn!(
                    operation,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
            },
        )
        .await;

        result.map_err(|e| AppError::upstream(operation, e.to_string()))
    }
}

/// OpenAI-compatible embedding client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    batch_size: usize,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "embedding.api_key is required for the openai provider".to_string(),
        })?;

        let dimension = match config.model.as_str() {
            "text-embedding-ada-002" | "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            _ => config.dimension,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.retry_base_delay(),
            },
        })
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&OpenAiRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| AppError::upstream("embedding", format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(
                "embedding",
                format!("API error {}: {}", status, body),
            ));
        }

        let result: OpenAiResponse = response.json().await.map_err(|e| {
            AppError::upstream("embedding", format!("Failed to parse response: {}", e))
        })?;

        if result.data.len() != texts.len() {
            return Err(AppError::upstream(
                "embedding",
                format!("expected {} embeddings, got {}", texts.len(), result.data.len()),
            ));
        }

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }

    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let result = self.retry.run("embedding", || self.make_request(texts)).await;
        metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            &self.model,
            texts.len(),
            result.is_ok(),
        );
        result
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Err(AppError::EmptyInput {
                message: "text is empty after cleaning".to_string(),
            });
        }

        let embeddings = self.request_with_retry(&[cleaned]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::upstream("embedding", "Empty response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let plan = BatchPlan::new(texts)?;

        let mut embedded = Vec::with_capacity(plan.non_empty.len());
        for chunk in plan.non_empty.chunks(self.batch_size) {
            embedded.extend(self.request_with_retry(chunk).await?);
        }

        Ok(plan.assemble(embedded, self.dimension))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cleaned batch with the positions of empty inputs remembered
struct BatchPlan {
    non_empty: Vec<String>,
    empty_positions: Vec<usize>,
    total: usize,
}

impl BatchPlan {
    fn new(texts: &[String]) -> Result<Self> {
        let mut non_empty = Vec::with_capacity(texts.len());
        let mut empty_positions = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let cleaned = clean_text(text);
            if cleaned.is_empty() {
                empty_positions.push(i);
            } else {
                non_empty.push(cleaned);
            }
        }

        if !texts.is_empty() && non_empty.is_empty() {
            return Err(AppError::EmptyInput {
                message: format!("all {} texts are empty after cleaning", texts.len()),
            });
        }

        if !empty_positions.is_empty() {
            tracing::debug!(
                skipped = empty_positions.len(),
                "Empty texts in batch receive zero vectors"
            );
        }

        Ok(Self {
            non_empty,
            empty_positions,
            total: texts.len(),
        })
    }

    /// Re-align embeddings with the original input positions
    fn assemble(self, embedded: Vec<Vec<f32>>, dimension: usize) -> Vec<Vec<f32>> {
        let mut embedded = embedded.into_iter();
        let mut empty = self.empty_positions.into_iter().peekable();
        let mut out = Vec::with_capacity(self.total);

        for i in 0..self.total {
            if empty.peek() == Some(&i) {
                empty.next();
                out.push(vec![0.0; dimension]);
            } else if let Some(vector) = embedded.next() {
                out.push(vector);
            }
        }
        out
    }
}

/// Deterministic bag-of-words embedder using feature hashing
///
/// Texts sharing words land near each other under cosine similarity, which
/// is enough to exercise vector retrieval without a model.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Err(AppError::EmptyInput {
                message: "text is empty after cleaning".to_string(),
            });
        }
        Ok(self.vectorize(&cleaned))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let plan = BatchPlan::new(texts)?;
        let embedded = plan.non_empty.iter().map(|t| self.vectorize(t)).collect();
        Ok(plan.assemble(embedded, self.dimension))
    }

    fn model_name(&self) -> &str {
        "hashing-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "hashing" | "mock" => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("unknown embedding provider '{other}'"),
        }),
    }
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  hello \n\t world  "), "hello world");
        assert_eq!(clean_text(" \n "), "");
    }

    #[test]
    fn test_backoff_schedule() {
        use backoff::backoff::Backoff;

        let mut schedule = RetryPolicy::default().backoff();
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(4)));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("embedding", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(AppError::upstream("embedding", "boom"))
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Upstream { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let attempts = AtomicU32::new(0);

        let value = policy
            .run("embedding", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::upstream("embedding", "flaky"))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("vector databases store embeddings").await.unwrap();
        let b = embedder.embed("vector  databases store embeddings ").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let related = embedder.embed("databases store vectors").await.unwrap();
        let unrelated = embedder.embed("banana bread recipe").await.unwrap();
        assert!(cosine_similarity(&a, &related) > cosine_similarity(&a, &unrelated));
    }

    #[tokio::test]
    async fn test_all_empty_batch_is_empty_input() {
        let embedder = HashingEmbedder::new(8);
        let err = embedder
            .embed_batch(&["  ".to_string(), "\n".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyInput { .. }));

        let err = embedder.embed("   ").await.unwrap_err();
        assert!(matches!(err, AppError::EmptyInput { .. }));
    }

    #[tokio::test]
    async fn test_mixed_batch_keeps_alignment() {
        let embedder = HashingEmbedder::new(8);
        let texts = vec!["alpha".to_string(), " ".to_string(), "beta".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 3);
        assert!(embeddings[1].iter().all(|v| *v == 0.0));
        assert_eq!(embeddings[0], embedder.embed("alpha").await.unwrap());
        assert_eq!(embeddings[2], embedder.embed("beta").await.unwrap());
    }

    #[test]
    fn test_openai_embedder_requires_key() {
        let config = EmbeddingConfig::default();
        assert!(matches!(
            OpenAiEmbedder::new(&config),
            Err(AppError::Configuration { .. })
        ));
    }
}
