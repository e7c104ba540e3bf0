//! Change detection between the current document set and the last snapshot.
//!
//! [`diff`] is a pure function: no I/O, no clock, same output for the same
//! input. Each current document is fingerprinted and compared with the
//! snapshot entry for its id.
//!
//! | Condition | Group |
//! |-----------|-------|
//! | id not in snapshot | `added` |
//! | id in snapshot, fingerprint differs | `updated` |
//! | id in snapshot, fingerprint equal | `unchanged` |
//! | snapshot id not in current set | `deleted` |
//!
//! Groups are sorted by id so that logs and summaries are stable; callers
//! should still treat them as sets.

use std::collections::{HashMap, HashSet};

use crate::fingerprint::fingerprint;
use crate::models::{Document, Snapshot};

/// A current document together with its freshly computed fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub document: Document,
    pub fingerprint: String,
}

impl Classified {
    pub fn id(&self) -> &str {
        &self.document.id
    }
}

/// Partition of `snapshot.ids ∪ current.ids`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<Classified>,
    pub updated: Vec<Classified>,
    pub unchanged: Vec<Classified>,
    pub deleted: Vec<String>,
    /// Ids that appeared more than once in the current set. The last
    /// occurrence is the one classified.
    pub duplicates: Vec<String>,
}

impl ChangeSet {
    /// True when nothing needs to be embedded, upserted or deleted.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Documents that need a fresh embedding: `added` then `updated`.
    pub fn pending(&self) -> impl Iterator<Item = &Classified> {
        self.added.iter().chain(self.updated.iter())
    }

    pub fn added_ids(&self) -> Vec<String> {
        self.added.iter().map(|c| c.document.id.clone()).collect()
    }

    pub fn updated_ids(&self) -> Vec<String> {
        self.updated.iter().map(|c| c.document.id.clone()).collect()
    }

    pub fn unchanged_ids(&self) -> Vec<String> {
        self.unchanged.iter().map(|c| c.document.id.clone()).collect()
    }
}

/// Classify `current` against `snapshot`.
pub fn diff(current: &[Document], snapshot: &Snapshot) -> ChangeSet {
    // Last occurrence wins for duplicate ids.
    let mut latest: HashMap<&str, &Document> = HashMap::with_capacity(current.len());
    let mut duplicates: HashSet<String> = HashSet::new();
    for doc in current {
        if latest.insert(doc.id.as_str(), doc).is_some() {
            duplicates.insert(doc.id.clone());
        }
    }

    let mut changes = ChangeSet::default();

    for doc in latest.values() {
        let classified = Classified {
            document: (*doc).clone(),
            fingerprint: fingerprint(doc),
        };
        match snapshot.get(&doc.id) {
            None => changes.added.push(classified),
            Some(record) if record.fingerprint != classified.fingerprint => {
                changes.updated.push(classified)
            }
            Some(_) => changes.unchanged.push(classified),
        }
    }

    changes.deleted = snapshot
        .keys()
        .filter(|id| !latest.contains_key(id.as_str()))
        .cloned()
        .collect();

    changes.added.sort_by(|a, b| a.document.id.cmp(&b.document.id));
    changes.updated.sort_by(|a, b| a.document.id.cmp(&b.document.id));
    changes.unchanged.sort_by(|a, b| a.document.id.cmp(&b.document.id));
    changes.deleted.sort();
    changes.duplicates = duplicates.into_iter().collect();
    changes.duplicates.sort();

    changes
}
