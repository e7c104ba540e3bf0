//! Cloudflare Workers AI embedding adapter.
//!
//! `POST /accounts/{account}/ai/run/{model}` with `{"text": [...]}`; the
//! vectors come back in `result.data`, in input order.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{http_timeout, EmbeddingProvider};
use crate::cloudflare::CloudflareClient;
use crate::config::{CloudflareConfig, EmbeddingConfig};
use crate::error::ProviderError;

/// Default Workers AI embedding model and its dimensionality.
pub const DEFAULT_MODEL: &str = "@cf/baai/bge-base-en-v1.5";
pub const DEFAULT_DIMS: usize = 768;

#[derive(Debug, Deserialize)]
struct RunResult {
    data: Vec<Vec<f32>>,
}

pub struct WorkersAiProvider {
    client: CloudflareClient,
    model: String,
    dims: usize,
}

impl WorkersAiProvider {
    pub fn new(cf: &CloudflareConfig, config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: CloudflareClient::new(cf, http_timeout(config))?,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dims: config.dims.unwrap_or(DEFAULT_DIMS),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for WorkersAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = self.client.account_url(&format!("ai/run/{}", self.model));
        let req = self.client.post(&url).json(&json!({ "text": texts }));
        let result: RunResult = self.client.send(req).await?;
        if result.data.len() != texts.len() {
            return Err(ProviderError::Permanent(format!(
                "malformed response: {} vectors for {} inputs",
                result.data.len(),
                texts.len()
            )));
        }
        Ok(result.data)
    }
}
