//! The sync pass: bring the vector index in line with the document source.
//!
//! # Phases
//!
//! ```text
//! Idle → Detecting → Embedding → Deleting → Upserting → Committing → Idle
//!            └──────────┴───────────┴───────────┴────────────┴──→ Aborted(reason)
//! ```
//!
//! 1. Take the collection's writer guard, list documents, load the snapshot.
//! 2. [`diff`] the two. Nothing added, updated or deleted → done, with no
//!    embedding calls, no index writes and no commit.
//! 3. Check the index dimension and metric against the embedder and config.
//! 4. Embed added and updated documents. Failed items are left out.
//! 5. Delete vectors of removed documents.
//! 6. Upsert vectors for the embedded documents.
//! 7. Commit the new snapshot once, containing only mutations that the index
//!    accepted.
//!
//! Item and batch failures end up in [`SyncSummary::failed`] and
//! [`SyncSummary::errors`] and are retried on the next pass. Configuration
//! errors, and failures to list, load, validate or commit, fail the pass.
//!
//! Documents the source reports as unreadable keep their snapshot record
//! untouched: they are neither re-embedded nor deleted.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::detect::{diff, Classified};
use crate::embedding::{document_text, EmbeddingOrchestrator};
use crate::error::SyncError;
use crate::models::{
    Document, Snapshot, SyncRecord, SyncSummary, VectorMetadata, VectorRecord, DOCUMENT_ID_KEY,
};
use crate::source::DocumentSource;
use crate::state::{SyncGuards, SyncStateStore};
use crate::vector_store::{vector_id_for, VectorStore};

/// Where a [`Reconciler`] currently is in its pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Detecting,
    Embedding,
    Deleting,
    Upserting,
    Committing,
    Aborted(String),
}

pub struct Reconciler {
    source: Arc<dyn DocumentSource>,
    state: Arc<dyn SyncStateStore>,
    embedder: Arc<EmbeddingOrchestrator>,
    store: Arc<dyn VectorStore>,
    guards: SyncGuards,
    metric: String,
    phase: Mutex<SyncPhase>,
}

impl Reconciler {
    /// Build a reconciler that uses the process-wide [`SyncGuards`].
    pub fn new(
        source: Arc<dyn DocumentSource>,
        state: Arc<dyn SyncStateStore>,
        embedder: Arc<EmbeddingOrchestrator>,
        store: Arc<dyn VectorStore>,
        metric: &str,
    ) -> Self {
        Self {
            source,
            state,
            embedder,
            store,
            guards: SyncGuards::global(),
            metric: metric.to_string(),
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    pub fn with_guards(mut self, guards: SyncGuards) -> Self {
        self.guards = guards;
        self
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_phase(&self, next: SyncPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        debug!(collection = self.source.collection(), from = ?*phase, to = ?next, "sync phase");
        *phase = next;
    }

    /// Run one sync pass for the source's collection.
    ///
    /// Concurrent calls for the same collection run one after another.
    pub async fn sync(&self) -> Result<SyncSummary, SyncError> {
        let collection = self.source.collection().to_string();
        let _guard = self.guards.lock(&collection).await;

        match self.run(&collection).await {
            Ok(summary) => {
                self.set_phase(SyncPhase::Idle);
                Ok(summary)
            }
            Err(e) => {
                warn!(collection = %collection, error = %e, "sync aborted");
                self.set_phase(SyncPhase::Aborted(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(&self, collection: &str) -> Result<SyncSummary, SyncError> {
        self.set_phase(SyncPhase::Detecting);

        let listing = self
            .source
            .list_documents()
            .await
            .map_err(|e| SyncError::Source(format!("{:#}", e)))?;
        let previous = self.state.load(collection).await?;

        let mut summary = SyncSummary::default();

        // Unreadable documents are neither diffed nor deleted.
        let mut comparable: Snapshot = previous.clone();
        for u in &listing.unreadable {
            comparable.remove(&u.id);
            summary.failed.push(u.id.clone());
            summary
                .errors
                .push(format!("{}: unreadable: {}", u.id, u.reason));
        }

        let changes = diff(&listing.documents, &comparable);
        for id in &changes.duplicates {
            summary.errors.push(format!(
                "{}: duplicate id in source listing, last occurrence used",
                id
            ));
        }
        summary.unchanged = changes.unchanged_ids();

        info!(
            collection,
            added = changes.added.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            unchanged = changes.unchanged.len(),
            unreadable = listing.unreadable.len(),
            "changes detected"
        );

        if changes.is_noop() {
            summary.failed.sort();
            return Ok(summary);
        }

        self.validate_index().await?;

        // Embed
        let pending: Vec<&Classified> = changes.pending().collect();
        let mut embedded: Vec<&Classified> = Vec::with_capacity(pending.len());
        let mut records: Vec<VectorRecord> = Vec::with_capacity(pending.len());
        if !pending.is_empty() {
            self.set_phase(SyncPhase::Embedding);
            let max_chars = self.embedder.max_input_chars();
            let texts: Vec<String> = pending
                .iter()
                .map(|c| document_text(&c.document, max_chars))
                .collect();
            let results = self.embedder.embed(&texts).await;

            for ((c, text), result) in pending.iter().copied().zip(texts).zip(results) {
                match result {
                    Ok(values) => {
                        records.push(vector_record(&c.document, text, values));
                        embedded.push(c);
                    }
                    Err(e) => {
                        warn!(document = c.id(), error = %e, "embedding failed");
                        summary.failed.push(c.id().to_string());
                        summary.errors.push(format!("{}: {}", c.id(), e));
                    }
                }
            }
        }

        // Delete
        let mut removed: Vec<String> = Vec::new();
        if !changes.deleted.is_empty() {
            self.set_phase(SyncPhase::Deleting);
            let vector_ids: Vec<String> =
                changes.deleted.iter().map(|id| vector_id_for(id)).collect();
            match self.store.delete_by_ids(&vector_ids).await {
                Ok(result) => {
                    debug!(count = result.count, mutation_id = ?result.mutation_id, "vectors deleted");
                    removed = changes.deleted.clone();
                }
                Err(e) => {
                    warn!(count = changes.deleted.len(), error = %e, "delete failed");
                    summary.errors.push(format!(
                        "delete of [{}] failed: {}",
                        changes.deleted.join(", "),
                        e
                    ));
                    summary.failed.extend(changes.deleted.iter().cloned());
                }
            }
        }

        // Upsert
        let mut upserted: Vec<&Classified> = Vec::new();
        if !records.is_empty() {
            self.set_phase(SyncPhase::Upserting);
            match self.store.upsert(&records).await {
                Ok(result) => {
                    debug!(count = result.count, mutation_id = ?result.mutation_id, "vectors upserted");
                    upserted = embedded;
                }
                Err(e) => {
                    let ids: Vec<&str> = embedded.iter().map(|c| c.id()).collect();
                    warn!(count = ids.len(), error = %e, "upsert failed");
                    summary
                        .errors
                        .push(format!("upsert of [{}] failed: {}", ids.join(", "), e));
                    summary
                        .failed
                        .extend(ids.into_iter().map(str::to_string));
                }
            }
        }

        // Commit
        if !upserted.is_empty() || !removed.is_empty() {
            self.set_phase(SyncPhase::Committing);
            let next = next_snapshot(previous, &upserted, &removed);
            self.state.commit(collection, &next).await?;
        }

        let added: HashSet<&str> = changes.added.iter().map(|c| c.id()).collect();
        for c in &upserted {
            if added.contains(c.id()) {
                summary.added.push(c.id().to_string());
            } else {
                summary.updated.push(c.id().to_string());
            }
        }
        summary.added.sort();
        summary.updated.sort();
        summary.deleted = removed;
        summary.failed.sort();
        summary.failed.dedup();

        info!(
            collection,
            added = summary.added.len(),
            updated = summary.updated.len(),
            deleted = summary.deleted.len(),
            failed = summary.failed.len(),
            "sync complete"
        );
        Ok(summary)
    }

    async fn validate_index(&self) -> Result<(), SyncError> {
        let index = self.store.index_info().await?;
        let dims = self.embedder.dims();
        if index.dimensions != dims {
            return Err(SyncError::Config(format!(
                "index '{}' has dimension {}, embedding model '{}' produces {}",
                index.name,
                index.dimensions,
                self.embedder.model_name(),
                dims
            )));
        }
        if !index.metric.eq_ignore_ascii_case(&self.metric) {
            return Err(SyncError::Config(format!(
                "index '{}' uses metric '{}', configured metric is '{}'",
                index.name, index.metric, self.metric
            )));
        }
        Ok(())
    }
}

/// Old snapshot plus fresh records for upserted documents, minus deleted ids.
/// Everything else (unchanged, failed, unreadable) is carried over as-is.
fn next_snapshot(mut snapshot: Snapshot, upserted: &[&Classified], removed: &[String]) -> Snapshot {
    let now = Utc::now();
    for c in upserted {
        let doc = &c.document;
        snapshot.insert(
            doc.id.clone(),
            SyncRecord {
                id: doc.id.clone(),
                fingerprint: c.fingerprint.clone(),
                title: doc.title.clone(),
                last_modified: doc.last_modified,
                version: doc.version,
                synced_at: now,
            },
        );
    }
    for id in removed {
        snapshot.remove(id);
    }
    snapshot
}

/// Build the index record for `doc`. `content` is the embedded text.
pub fn vector_record(doc: &Document, content: String, values: Vec<f32>) -> VectorRecord {
    let mut metadata = VectorMetadata::new();
    for (key, value) in &doc.metadata {
        metadata.insert(key.clone(), Value::String(value.clone()));
    }
    metadata.insert(DOCUMENT_ID_KEY.to_string(), Value::String(doc.id.clone()));
    metadata.insert("title".to_string(), Value::String(doc.title.clone()));
    metadata.insert("content".to_string(), Value::String(content));
    metadata.insert(
        "last_modified".to_string(),
        Value::String(doc.last_modified.to_rfc3339()),
    );
    metadata.insert("version".to_string(), Value::from(doc.version));

    VectorRecord {
        id: vector_id_for(&doc.id),
        values,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn doc(id: &str) -> Document {
        let mut metadata = BTreeMap::new();
        metadata.insert("space".to_string(), "ENG".to_string());
        metadata.insert("title".to_string(), "shadowed".to_string());
        Document {
            id: id.into(),
            title: "Runbook".into(),
            body: "restart the thing".into(),
            last_modified: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            version: 7,
            metadata,
        }
    }

    #[test]
    fn test_vector_record_metadata_layout() {
        let r = vector_record(&doc("42"), "Runbook\n\nrestart".into(), vec![0.1, 0.2]);
        assert_eq!(r.id, "42");
        assert_eq!(r.metadata["document_id"], "42");
        assert_eq!(r.metadata["title"], "Runbook");
        assert_eq!(r.metadata["content"], "Runbook\n\nrestart");
        assert_eq!(r.metadata["version"], 7);
        assert_eq!(r.metadata["space"], "ENG");
        assert_eq!(r.metadata["last_modified"], "2024-05-01T09:00:00+00:00");
    }

    #[test]
    fn test_vector_record_long_id_keeps_document_id() {
        let long_id = "space/".repeat(30);
        let r = vector_record(&doc(&long_id), "x".into(), vec![1.0]);
        assert_eq!(r.id.len(), 64);
        assert_eq!(r.metadata["document_id"], long_id.as_str());
    }

    #[test]
    fn test_next_snapshot_applies_only_given_mutations() {
        let old_record = |id: &str| SyncRecord {
            id: id.into(),
            fingerprint: "old".into(),
            title: "t".into(),
            last_modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            version: 1,
            synced_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let mut previous = Snapshot::new();
        previous.insert("keep".into(), old_record("keep"));
        previous.insert("gone".into(), old_record("gone"));
        previous.insert("upd".into(), old_record("upd"));

        let fresh = Classified {
            document: doc("upd"),
            fingerprint: "new".into(),
        };
        let next = next_snapshot(previous, &[&fresh], &["gone".to_string()]);

        assert_eq!(next.len(), 2);
        assert_eq!(next["keep"].fingerprint, "old");
        assert_eq!(next["upd"].fingerprint, "new");
        assert_eq!(next["upd"].version, 7);
        assert!(!next.contains_key("gone"));
    }
}
