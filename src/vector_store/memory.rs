//! In-memory [`VectorStore`] implementation for tests and local runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Query is a brute-force scan
//! scored with the index metric (cosine similarity or dot product).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::VectorStore;
use crate::embedding::cosine_similarity;
use crate::error::SyncError;
use crate::models::{IndexMetadata, MutationResult, QueryMatch, VectorMetadata, VectorRecord};

struct StoredVector {
    values: Vec<f32>,
    metadata: VectorMetadata,
}

/// In-memory vector index.
pub struct InMemoryVectorStore {
    name: String,
    dims: usize,
    metric: String,
    vectors: RwLock<HashMap<String, StoredVector>>,
    writes: AtomicUsize,
}

impl InMemoryVectorStore {
    pub fn new(name: &str, dims: usize, metric: &str) -> Self {
        Self {
            name: name.to_string(),
            dims,
            metric: metric.to_string(),
            vectors: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of upsert and delete calls accepted so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        if self.metric.eq_ignore_ascii_case("dot-product") {
            a.iter().zip(b).map(|(x, y)| x * y).sum()
        } else {
            cosine_similarity(a, b)
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StoredVector>> {
        self.vectors.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, StoredVector>> {
        self.vectors.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<MutationResult, SyncError> {
        // Validate the whole batch first so a bad record rejects nothing else.
        if let Some(bad) = records.iter().find(|r| r.values.len() != self.dims) {
            return Err(SyncError::Permanent(format!(
                "vector '{}' has dimension {}, index '{}' expects {}",
                bad.id,
                bad.values.len(),
                self.name,
                self.dims
            )));
        }
        let mut vectors = self.write();
        for r in records {
            vectors.insert(
                r.id.clone(),
                StoredVector {
                    values: r.values.clone(),
                    metadata: r.metadata.clone(),
                },
            );
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(MutationResult {
            mutation_id: None,
            count: records.len(),
        })
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<MutationResult, SyncError> {
        let mut vectors = self.write();
        for id in ids {
            vectors.remove(id);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(MutationResult {
            mutation_id: None,
            count: ids.len(),
        })
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, SyncError> {
        if vector.len() != self.dims {
            return Err(SyncError::Permanent(format!(
                "query vector has dimension {}, index '{}' expects {}",
                vector.len(),
                self.name,
                self.dims
            )));
        }
        let vectors = self.read();
        let mut matches: Vec<QueryMatch> = vectors
            .iter()
            .map(|(id, sv)| QueryMatch {
                id: id.clone(),
                score: self.score(vector, &sv.values),
                metadata: sv.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn index_info(&self) -> Result<IndexMetadata, SyncError> {
        Ok(IndexMetadata {
            name: self.name.clone(),
            dimensions: self.dims,
            metric: self.metric.clone(),
            vector_count: self.read().len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, values: Vec<f32>) -> VectorRecord {
        let mut metadata = VectorMetadata::new();
        metadata.insert("document_id".into(), id.into());
        VectorRecord {
            id: id.into(),
            values,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = InMemoryVectorStore::new("t", 2, "cosine");
        store.upsert(&[record("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(&[record("a", vec![1.0, 0.0])]).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.index_info().await.unwrap().vector_count, 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_noop() {
        let store = InMemoryVectorStore::new("t", 2, "cosine");
        store.upsert(&[record("a", vec![1.0, 0.0])]).await.unwrap();
        let res = store.delete_by_ids(&["missing".to_string()]).await;
        assert!(res.is_ok());
        assert!(store.contains("a"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_batch() {
        let store = InMemoryVectorStore::new("t", 2, "cosine");
        let err = store
            .upsert(&[record("a", vec![1.0, 0.0]), record("b", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Permanent(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = InMemoryVectorStore::new("t", 2, "cosine");
        store
            .upsert(&[
                record("near", vec![1.0, 0.1]),
                record("far", vec![0.0, 1.0]),
                record("mid", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();
        let matches = store.query(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(matches[0].score > matches[1].score);
        assert_eq!(matches[0].document_id(), Some("near"));
    }

    #[tokio::test]
    async fn test_dot_product_metric_uses_magnitude() {
        let store = InMemoryVectorStore::new("t", 2, "dot-product");
        store
            .upsert(&[record("short", vec![1.0, 0.0]), record("long", vec![3.0, 3.0])])
            .await
            .unwrap();
        let matches = store.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(matches[0].id, "long");
        assert!((matches[0].score - 3.0).abs() < 1e-6);
        assert!((matches[1].score - 1.0).abs() < 1e-6);
    }
}
