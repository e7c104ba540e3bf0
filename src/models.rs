//! Core data models used throughout vector-sync.
//!
//! These types represent the documents, sync records, vectors, and query
//! matches that flow between the document source, the sync engine, and the
//! vector store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Metadata attached to a vector in the index.
pub type VectorMetadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the id of the source document a vector belongs to.
pub const DOCUMENT_ID_KEY: &str = "document_id";

/// A normalized document supplied by a [`DocumentSource`](crate::source::DocumentSource).
///
/// Owned by the source; the sync engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
    pub last_modified: DateTime<Utc>,
    pub version: i64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A document the source knows about but could not read.
///
/// Distinct from a document with an empty body: the sync engine neither
/// re-embeds nor deletes it, and reports it as failed.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableDocument {
    pub id: String,
    pub reason: String,
}

/// Everything a source returned for one listing.
#[derive(Debug, Clone, Default)]
pub struct SourceListing {
    pub documents: Vec<Document>,
    pub unreadable: Vec<UnreadableDocument>,
}

/// Persisted record of a document that was last synced successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    pub id: String,
    pub fingerprint: String,
    pub title: String,
    pub last_modified: DateTime<Utc>,
    pub version: i64,
    pub synced_at: DateTime<Utc>,
}

/// The persisted state of one collection: document id → [`SyncRecord`].
pub type Snapshot = HashMap<String, SyncRecord>;

/// A vector as written to the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// One nearest-neighbor hit. Higher `score` means more similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

impl QueryMatch {
    /// The source document id recorded in the match metadata, if present.
    pub fn document_id(&self) -> Option<&str> {
        self.metadata
            .get(DOCUMENT_ID_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Index configuration and size as reported by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMetadata {
    pub name: String,
    pub dimensions: usize,
    pub metric: String,
    pub vector_count: u64,
}

/// Outcome of an accepted upsert or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationResult {
    /// Store-assigned id of the (last) mutation, when the store reports one.
    pub mutation_id: Option<String>,
    /// Number of ids submitted in accepted requests.
    pub count: usize,
}

/// Result of one sync pass, returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
    pub errors: Vec<String>,
}

impl SyncSummary {
    /// True when the pass changed nothing in the index.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}
