//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only way the sync engine and query
//! service touch the index, enabling pluggable backends (Cloudflare
//! Vectorize, in-memory).
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorStore::upsert) | Insert or replace vectors by id |
//! | [`delete_by_ids`](VectorStore::delete_by_ids) | Remove vectors; unknown ids are a no-op |
//! | [`query`](VectorStore::query) | Nearest neighbors of a vector, with metadata |
//! | [`index_info`](VectorStore::index_info) | Dimension, metric, and vector count |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod vectorize;

pub use memory::InMemoryVectorStore;
pub use vectorize::VectorizeStore;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::Config;
use crate::error::SyncError;
use crate::models::{IndexMetadata, MutationResult, QueryMatch, VectorRecord};

/// Longest vector id the index accepts, in bytes.
pub const MAX_VECTOR_ID_BYTES: usize = 64;

/// Abstract vector index.
///
/// Mutations are idempotent by id. A batch that the backend only partly
/// accepted must surface as [`SyncError::PartialBatch`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace vectors by id.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<MutationResult, SyncError>;

    /// Delete vectors by id. Ids that do not exist are ignored.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<MutationResult, SyncError>;

    /// Return up to `top_k` nearest neighbors of `vector`, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, SyncError>;

    /// Describe the index.
    async fn index_info(&self) -> Result<IndexMetadata, SyncError>;
}

/// Map a document id to the vector id stored in the index.
///
/// Ids up to [`MAX_VECTOR_ID_BYTES`] are used as-is; longer ones are
/// replaced by their SHA-256 hex digest (exactly 64 bytes). The document
/// id always travels in the vector metadata.
pub fn vector_id_for(document_id: &str) -> String {
    if document_id.len() <= MAX_VECTOR_ID_BYTES {
        document_id.to_string()
    } else {
        hex::encode(Sha256::digest(document_id.as_bytes()))
    }
}

/// Create the configured [`VectorStore`].
///
/// | Config Value | Store |
/// |-------------|-------|
/// | `"memory"` | [`InMemoryVectorStore`] |
/// | `"cloudflare"` | [`VectorizeStore`] |
pub fn create_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let vs = &config.vector_store;
    match vs.provider.as_str() {
        "memory" => {
            let dims = config.embedding.dims.unwrap_or(0);
            Ok(Arc::new(InMemoryVectorStore::new(
                &vs.index_name,
                dims,
                &vs.metric,
            )))
        }
        "cloudflare" => {
            let cf = config
                .cloudflare
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[cloudflare] section required"))?;
            Ok(Arc::new(VectorizeStore::from_config(cf, config)?))
        }
        other => bail!("Unknown vector store provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_ids_kept() {
        assert_eq!(vector_id_for("page-1"), "page-1");
        let exactly = "a".repeat(MAX_VECTOR_ID_BYTES);
        assert_eq!(vector_id_for(&exactly), exactly);
    }

    #[test]
    fn test_long_ids_hashed() {
        let long = "docs/".repeat(20);
        let id = vector_id_for(&long);
        assert_eq!(id.len(), MAX_VECTOR_ID_BYTES);
        assert_eq!(id, vector_id_for(&long));
        assert_ne!(id, long);
    }
}
