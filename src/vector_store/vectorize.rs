//! Cloudflare Vectorize (v2) adapter.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | upsert | `POST /vectorize/v2/indexes/{name}/upsert` (NDJSON body) |
//! | delete | `POST /vectorize/v2/indexes/{name}/delete_by_ids` |
//! | query | `POST /vectorize/v2/indexes/{name}/query` |
//! | info | `GET /vectorize/v2/indexes/{name}` + `GET .../info` |
//! | provision | `POST /vectorize/v2/indexes` + `.../metadata_index/create` |
//!
//! Mutations are split into batches of `vector_store.batch_size`. Each
//! request is retried on transient errors; if a later batch fails after an
//! earlier one was accepted the call reports [`SyncError::PartialBatch`].

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::VectorStore;
use crate::cloudflare::CloudflareClient;
use crate::config::{CloudflareConfig, Config};
use crate::error::{ProviderError, SyncError};
use crate::models::{
    IndexMetadata, MutationResult, QueryMatch, VectorMetadata, VectorRecord, DOCUMENT_ID_KEY,
};
use crate::retry::{with_backoff, RetryPolicy};

/// Largest `topK` Vectorize accepts when metadata is returned in full.
pub const MAX_TOP_K_WITH_METADATA: usize = 20;

#[derive(Debug, Deserialize)]
struct Mutation {
    #[serde(rename = "mutationId", default)]
    mutation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<VectorMetadata>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    name: String,
    config: IndexConfig,
}

#[derive(Debug, Deserialize)]
struct IndexConfig {
    dimensions: usize,
    metric: String,
}

#[derive(Debug, Deserialize)]
struct IndexInfo {
    #[serde(rename = "vectorCount", default)]
    vector_count: u64,
}

#[derive(Debug, Deserialize)]
struct TokenStatus {
    #[serde(default)]
    status: String,
}

/// Parameters for creating an index.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub dimensions: usize,
    pub metric: String,
    pub description: String,
    /// Metadata properties to index for filtering (string type).
    pub metadata_indexes: Vec<String>,
}

impl IndexSpec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.vector_store.index_name.clone(),
            dimensions: config.embedding.dims.unwrap_or(0),
            metric: config.vector_store.metric.clone(),
            description: format!("vector-sync index for collection '{}'", config.collection),
            metadata_indexes: vec![DOCUMENT_ID_KEY.to_string()],
        }
    }
}

/// Outcome of [`VectorizeStore::provision_index`].
#[derive(Debug, Clone, PartialEq)]
pub enum Provisioned {
    AlreadyExists(IndexMetadata),
    Created,
}

pub struct VectorizeStore {
    client: CloudflareClient,
    index_name: String,
    batch_size: usize,
    retry: RetryPolicy,
}

impl VectorizeStore {
    pub fn new(
        client: CloudflareClient,
        index_name: &str,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            index_name: index_name.to_string(),
            batch_size: batch_size.max(1),
            retry,
        }
    }

    pub fn from_config(cf: &CloudflareConfig, config: &Config) -> Result<Self> {
        let vs = &config.vector_store;
        let client = CloudflareClient::new(cf, Duration::from_secs(vs.timeout_secs))?;
        Ok(Self::new(
            client,
            &vs.index_name,
            vs.batch_size,
            RetryPolicy::new(vs.max_retries, Duration::from_millis(vs.backoff_base_ms)),
        ))
    }

    fn index_url(&self, suffix: &str) -> String {
        let base = format!("vectorize/v2/indexes/{}", self.index_name);
        if suffix.is_empty() {
            self.client.account_url(&base)
        } else {
            self.client.account_url(&format!("{}/{}", base, suffix))
        }
    }

    /// Create the index if it does not exist yet.
    pub async fn provision_index(&self, spec: &IndexSpec) -> Result<Provisioned, SyncError> {
        let (status, body) = self
            .retrying("describe index", || self.client.fetch(self.client.get(&self.index_url(""))))
            .await?;
        if status != StatusCode::NOT_FOUND {
            let _: IndexDescription = CloudflareClient::decode(status, &body).map_err(SyncError::from)?;
            let existing = self.index_info().await?;
            info!(index = %spec.name, "vector index already exists");
            return Ok(Provisioned::AlreadyExists(existing));
        }

        let create = json!({
            "name": spec.name,
            "description": spec.description,
            "config": { "dimensions": spec.dimensions, "metric": spec.metric },
        });
        let url = self.client.account_url("vectorize/v2/indexes");
        let _: serde_json::Value = self
            .retrying("create index", || {
                self.client.send(self.client.post(&url).json(&create))
            })
            .await?;

        for property in &spec.metadata_indexes {
            let body = json!({ "propertyName": property, "indexType": "string" });
            let url = self.index_url("metadata_index/create");
            let _: serde_json::Value = self
                .retrying("create metadata index", || {
                    self.client.send(self.client.post(&url).json(&body))
                })
                .await?;
        }

        info!(index = %spec.name, dimensions = spec.dimensions, metric = %spec.metric, "vector index created");
        Ok(Provisioned::Created)
    }

    /// Check that the API token is valid and active.
    pub async fn verify_token(&self) -> Result<bool, SyncError> {
        let url = self.client.url("user/tokens/verify");
        let status: TokenStatus = self
            .retrying("verify token", || self.client.send(self.client.get(&url)))
            .await?;
        Ok(status.status == "active")
    }

    async fn retrying<T, F, Fut>(&self, what: &str, op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        with_backoff(&self.retry, what, op)
            .await
            .map_err(SyncError::from)
    }

    /// Run one mutation per batch. Fails as a whole if any batch fails, and
    /// as a partial batch if an earlier batch had already been accepted.
    async fn mutate_batches<I, F, Fut>(
        &self,
        what: &str,
        batches: Vec<I>,
        sizes: Vec<usize>,
        mut send: F,
    ) -> Result<MutationResult, SyncError>
    where
        F: FnMut(&I) -> Fut,
        Fut: std::future::Future<Output = Result<Mutation, ProviderError>>,
    {
        let total: usize = sizes.iter().sum();
        let mut result = MutationResult::default();
        for (batch, size) in batches.iter().zip(sizes) {
            match self.retrying(what, || send(batch)).await {
                Ok(m) => {
                    debug!(what, size, mutation_id = ?m.mutation_id, "batch accepted");
                    result.count += size;
                    if m.mutation_id.is_some() {
                        result.mutation_id = m.mutation_id;
                    }
                }
                Err(e) if result.count > 0 => {
                    return Err(SyncError::PartialBatch(format!(
                        "{}: {} of {} accepted before failure: {}",
                        what, result.count, total, e
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }
}

/// Serialize records as newline-delimited JSON, the upsert wire format.
pub fn to_ndjson(records: &[VectorRecord]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for r in records {
        out.push_str(&serde_json::to_string(r)?);
        out.push('\n');
    }
    Ok(out)
}

#[async_trait]
impl VectorStore for VectorizeStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<MutationResult, SyncError> {
        let mut bodies = Vec::new();
        let mut sizes = Vec::new();
        for chunk in records.chunks(self.batch_size) {
            let body = to_ndjson(chunk)
                .map_err(|e| SyncError::Permanent(format!("cannot encode vectors: {}", e)))?;
            bodies.push(body);
            sizes.push(chunk.len());
        }
        let url = self.index_url("upsert");
        self.mutate_batches("upsert", bodies, sizes, |body: &String| {
            let req = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body.clone());
            self.client.send(req)
        })
        .await
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<MutationResult, SyncError> {
        let batches: Vec<Vec<String>> = ids.chunks(self.batch_size).map(|c| c.to_vec()).collect();
        let sizes = batches.iter().map(|b| b.len()).collect();
        let url = self.index_url("delete_by_ids");
        self.mutate_batches("delete", batches, sizes, |batch: &Vec<String>| {
            let req = self.client.post(&url).json(&json!({ "ids": batch }));
            self.client.send(req)
        })
        .await
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, SyncError> {
        let url = self.index_url("query");
        let top_k = top_k.min(MAX_TOP_K_WITH_METADATA);
        let body = json!({
            "vector": vector,
            "topK": top_k,
            "returnValues": false,
            "returnMetadata": "all",
        });
        let result: QueryResult = self
            .retrying("query", || self.client.send(self.client.post(&url).json(&body)))
            .await?;
        Ok(result
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn index_info(&self) -> Result<IndexMetadata, SyncError> {
        let describe_url = self.index_url("");
        let description: IndexDescription = self
            .retrying("describe index", || self.client.send(self.client.get(&describe_url)))
            .await?;
        let info_url = self.index_url("info");
        let info: IndexInfo = self
            .retrying("index info", || self.client.send(self.client.get(&info_url)))
            .await?;
        Ok(IndexMetadata {
            name: description.name,
            dimensions: description.config.dimensions,
            metric: description.config.metric,
            vector_count: info.vector_count,
        })
    }
}
