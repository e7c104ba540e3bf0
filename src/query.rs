//! Semantic search over the synced index.
//!
//! 1. Validate the request (non-blank text, `top_k >= 1`).
//! 2. Embed the text with the same truncation and retry policy as documents.
//! 3. Ask the index for `top_k × candidate_multiplier` candidates (capped at
//!    `max_candidates`, never below `top_k`), since filtering may drop some.
//! 4. [`rank`]: drop matches at or below `min_score` and matches without a
//!    `document_id`, sort by score descending (ties by id), keep `top_k`.

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingOrchestrator;
use crate::error::SyncError;
use crate::models::QueryMatch;
use crate::vector_store::VectorStore;

pub struct QueryService {
    embedder: Arc<EmbeddingOrchestrator>,
    store: Arc<dyn VectorStore>,
    retrieval: RetrievalConfig,
}

impl QueryService {
    pub fn new(
        embedder: Arc<EmbeddingOrchestrator>,
        store: Arc<dyn VectorStore>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            retrieval,
        }
    }

    /// Search with the configured `top_k` and `min_score`.
    pub async fn search_with_defaults(&self, text: &str) -> Result<Vec<QueryMatch>, SyncError> {
        self.search(text, self.retrieval.top_k, self.retrieval.min_score)
            .await
    }

    /// Return at most `top_k` matches scoring above `min_score`, best first.
    ///
    /// No matches is `Ok(vec![])`, not an error.
    pub async fn search(
        &self,
        text: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<QueryMatch>, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::Validation("query text is empty".to_string()));
        }
        if top_k == 0 {
            return Err(SyncError::Validation("top_k must be >= 1".to_string()));
        }

        let vector = self.embedder.embed_query(text).await?;
        let candidates = self.candidate_count(top_k);
        let matches = self.store.query(&vector, candidates).await?;
        let fetched = matches.len();
        let ranked = rank(matches, top_k, min_score);

        debug!(
            top_k,
            candidates,
            fetched,
            returned = ranked.len(),
            "search complete"
        );
        Ok(ranked)
    }

    fn candidate_count(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.retrieval.candidate_multiplier.max(1))
            .min(self.retrieval.max_candidates)
            .max(top_k)
    }
}

/// Filter, order and cut raw index matches.
pub fn rank(matches: Vec<QueryMatch>, top_k: usize, min_score: f32) -> Vec<QueryMatch> {
    let mut kept: Vec<QueryMatch> = matches
        .into_iter()
        .filter(|m| m.score.is_finite() && m.score > min_score)
        .filter(|m| m.document_id().is_some())
        .collect();

    kept.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    kept.truncate(top_k);
    kept
}
