//! Embedding provider abstraction and the embedding orchestrator.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: always fails; used when embeddings are not configured.
//! - **[`WorkersAiProvider`]**: Cloudflare Workers AI (`/ai/run/{model}`).
//! - **[`OpenAIProvider`]**: OpenAI `POST /v1/embeddings`.
//!
//! Providers only translate one HTTP call into vectors and classify errors.
//! [`EmbeddingOrchestrator`] owns everything else: text preparation,
//! bounded concurrency, retries, and per-item result isolation.
//!
//! # Text Preparation
//!
//! A document is embedded as `"{title}\n\n{body}"`, trimmed and cut to
//! `max_input_chars` characters before sending. The provider's request
//! size limit is a hard constraint, so truncation is never skipped.
//!
//! # Retry Strategy
//!
//! See [`crate::retry`]: transient errors (429, 5xx, timeouts, connection
//! failures) are retried with exponential backoff; permanent ones fail the
//! item immediately.

mod openai;
mod workers_ai;

pub use openai::OpenAIProvider;
pub use workers_ai::WorkersAiProvider;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ProviderError;
use crate::models::Document;
use crate::retry::{with_backoff, Exhausted, RetryPolicy};

/// Trait for embedding providers.
///
/// Implementations translate provider-specific JSON into plain vectors; the
/// rest of the crate never sees provider response shapes.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"@cf/baai/bge-base-en-v1.5"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed `texts` in one request, returning vectors in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Per-item outcome of [`EmbeddingOrchestrator::embed`].
pub type EmbedResult = std::result::Result<Vec<f32>, Exhausted>;

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Permanent(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"cloudflare"` | [`WorkersAiProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or missing credentials.
pub fn create_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.embedding.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "cloudflare" => {
            let cf = config
                .cloudflare
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[cloudflare] section required"))?;
            Ok(Arc::new(WorkersAiProvider::new(cf, &config.embedding)?))
        }
        "openai" => {
            let oa = config
                .openai
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[openai] section required"))?;
            Ok(Arc::new(OpenAIProvider::new(oa, &config.embedding)?))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Cut `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Build the text embedded for a document: title and body separated by a
/// blank line, trimmed, truncated to `max_chars`.
pub fn document_text(doc: &Document, max_chars: usize) -> String {
    let joined = format!("{}\n\n{}", doc.title, doc.body);
    truncate_chars(joined.trim(), max_chars).trim_end().to_string()
}

/// Tuning knobs for [`EmbeddingOrchestrator`].
#[derive(Debug, Clone)]
pub struct EmbedSettings {
    pub max_input_chars: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl EmbedSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_input_chars: config.embedding.max_input_chars,
            concurrency: config.embedding.concurrency.max(1),
            retry: RetryPolicy::from_config(&config.embedding),
        }
    }
}

/// Turns texts into vectors with bounded fan-out and per-item isolation.
pub struct EmbeddingOrchestrator {
    provider: Arc<dyn EmbeddingProvider>,
    settings: EmbedSettings,
}

impl EmbeddingOrchestrator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: EmbedSettings) -> Self {
        Self { provider, settings }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn max_input_chars(&self) -> usize {
        self.settings.max_input_chars
    }

    /// Embed every text independently.
    ///
    /// The returned vector has one entry per input, in input order. A failed
    /// item never affects the others. At most `concurrency` provider calls
    /// are in flight at once.
    pub async fn embed(&self, texts: &[String]) -> Vec<EmbedResult> {
        let mut results: Vec<Option<EmbedResult>> = (0..texts.len()).map(|_| None).collect();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, text) in texts.iter().enumerate() {
            let input = truncate_chars(text.trim(), self.settings.max_input_chars).to_string();
            if input.is_empty() {
                results[idx] = Some(Err(Exhausted {
                    error: ProviderError::Permanent("empty input text".to_string()),
                    attempts: 0,
                }));
                continue;
            }

            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.settings.retry.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    let err = ProviderError::Permanent("embedding pool closed".to_string());
                    return (idx, Err(Exhausted { error: err, attempts: 0 }));
                };
                (idx, embed_one(provider.as_ref(), &retry, input).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => warn!(error = %e, "embedding task did not complete"),
            }
        }

        results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(Exhausted {
                        error: ProviderError::Transient("embedding task aborted".to_string()),
                        attempts: 0,
                    })
                })
            })
            .collect()
    }

    /// Embed a single query text with the same truncation and retry policy.
    pub async fn embed_query(&self, text: &str) -> EmbedResult {
        self.embed(&[text.to_string()])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| {
                Err(Exhausted {
                    error: ProviderError::Permanent("empty embedding response".to_string()),
                    attempts: 0,
                })
            })
    }
}

async fn embed_one(
    provider: &dyn EmbeddingProvider,
    retry: &RetryPolicy,
    text: String,
) -> EmbedResult {
    let dims = provider.dims();
    let input = [text];
    let result = with_backoff(retry, provider.model_name(), || async {
        let mut vectors = provider.embed(&input).await?;
        if vectors.len() != 1 {
            return Err(ProviderError::Permanent(format!(
                "malformed response: expected 1 vector, got {}",
                vectors.len()
            )));
        }
        let vector = vectors.remove(0);
        if vector.len() != dims {
            return Err(ProviderError::Permanent(format!(
                "dimension mismatch: expected {}, got {}",
                dims,
                vector.len()
            )));
        }
        Ok::<_, ProviderError>(vector)
    })
    .await;

    if let Err(e) = &result {
        debug!(model = provider.model_name(), error = %e, "embedding failed");
    }
    result
}

/// Shared HTTP client settings for provider adapters.
pub(crate) fn http_timeout(config: &crate::config::EmbeddingConfig) -> Duration {
    Duration::from_secs(config.timeout_secs)
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
